use keel_di::{InjectError, Key};

#[derive(thiserror::Error, Debug, Clone)]
pub enum ModelError {
    #[error(transparent)]
    Inject(#[from] InjectError),

    /// A key marked for propagation is provided by nothing inside the model
    #[error("model '{model}' propagates {key} but does not provide it")]
    NotProvided { key: Key, model: String },
}
