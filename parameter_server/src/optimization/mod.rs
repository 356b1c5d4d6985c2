mod adagrad;
mod dcasgd;
mod dcasgda;
mod sgd;
mod updater;

use comms::specs::server::UpdaterSpec;

pub use adagrad::Adagrad;
pub use dcasgd::Dcasgd;
pub use dcasgda::Dcasgda;
pub use sgd::Sgd;
pub use updater::Updater;

/// Builds the update rule described by `spec`.
pub fn from_spec(spec: UpdaterSpec) -> Box<dyn Updater> {
    match spec {
        UpdaterSpec::Sgd {
            learning_rate,
            batch_size,
        } => Box::new(Sgd::new(learning_rate, batch_size)),
        UpdaterSpec::Adagrad {
            learning_rate,
            batch_size,
            epsilon,
        } => Box::new(Adagrad::new(learning_rate, batch_size, epsilon)),
        UpdaterSpec::Dcasgd {
            learning_rate,
            batch_size,
            lambda,
        } => Box::new(Dcasgd::new(learning_rate, batch_size, lambda)),
        UpdaterSpec::Dcasgda {
            learning_rate,
            batch_size,
            lambda,
            decay,
            epsilon,
        } => Box::new(Dcasgda::new(learning_rate, batch_size, lambda, decay, epsilon)),
    }
}
