mod staleness;

pub use staleness::StalenessGate;
