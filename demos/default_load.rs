use std::io;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use tracing_cloud_logging::metadata::StaticProjectId;
use tracing_cloud_logging::{CloudLoggingLayer, Enricher};

fn main() {
    let enricher = Enricher::new(Arc::new(StaticProjectId::new("load-test")));
    let layer = CloudLoggingLayer::new(enricher).with_writer(io::sink);
    let counters = layer.counters();

    tracing::subscriber::set_global_default(Registry::default().with(layer))
        .expect("set global subscriber");

    let n: u64 = 100_000;
    let start = Instant::now();

    let span = info_span!("request", cloud_trace_context = "105445aa7843bc8bf206b12000100000/1;o=1");
    let _guard = span.enter();
    for i in 0..n {
        info!(iteration = i, "default load test event");
    }

    let elapsed = start.elapsed();
    println!("enriched {} events in {:?} (~{:.0} ev/s), dropped {}",
        counters.emitted(),
        elapsed,
        n as f64 / elapsed.as_secs_f64(),
        counters.dropped(),
    );
}
