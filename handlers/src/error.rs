#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("handler {name:?} is not registered")]
    NotFound { name: String },

    #[error("the value is a promise that failed to resolve")]
    UnresolvedPromise,

    #[error("script threw: {}", .0.message.as_deref().unwrap_or("unknown error"))]
    RejectedPromise(deno_core::error::JsError),

    #[error("script does not define a `handler` function")]
    MissingHandlerFunction,

    #[error("failed to deserialize value")]
    Deserialize(#[from] serde_v8::Error),

    #[error("runtime error: {0}")]
    Runtime(#[from] deno_core::error::AnyError),
}

pub type Result<T> = std::result::Result<T, Error>;
