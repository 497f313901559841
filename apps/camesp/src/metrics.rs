use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "camesp_http_requests_total",
            "Outbound HTTP requests by outcome",
        ),
        &["outcome"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static HTTP_CHUNK_ACKS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "camesp_http_chunk_acks_total",
        "Acknowledgements sent after non-terminal response chunks",
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static RESERVATION_REJECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "camesp_reservation_rejections_total",
            "Refused camera reservation attempts",
        ),
        &["reason"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static SUPERVISOR_TICKS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("camesp_supervisor_ticks_total", "Supervisor loop iterations").unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static REBOOTS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "camesp_reboots_total",
        "Reboots requested by the fault threshold",
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});
