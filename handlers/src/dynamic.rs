use std::sync::Arc;

use async_trait::async_trait;
use scrapeworks_context::ScraperContext;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::{Error, Result},
    handler::Handler,
    ops::context_extension,
    runtime::{core_extensions, Runtime},
};

#[derive(Debug, Deserialize)]
struct DynamicParams {
    source_code: String,
    #[serde(default)]
    kwargs: Value,
}

/// Runs user-supplied source code that defines `function handler(ctx, kwargs)`.
/// Registered under the name `dynamic_scraper`; every other handler in the
/// registry is a fixed, compiled-in `Handler` impl.
pub struct DynamicHandler;

#[async_trait]
impl Handler for DynamicHandler {
    fn name(&self) -> &'static str {
        "dynamic_scraper"
    }

    async fn run(&self, ctx: Arc<ScraperContext>) -> anyhow::Result<String> {
        let params: DynamicParams = serde_json::from_value(ctx.params.clone())?;

        let result = tokio::task::spawn_blocking(move || run_on_dedicated_thread(params, ctx))
            .await
            .map_err(|e| anyhow::anyhow!("dynamic handler isolate thread panicked: {e}"))??;

        Ok(result)
    }
}

/// `JsRuntime` is `!Send`, so it can't simply be awaited from the worker's
/// multi-threaded executor. Each invocation gets its own single-threaded
/// Tokio runtime and `LocalSet`, mirroring how a pooled runtime would run on
/// its own OS thread, except we tear it down when the call returns instead
/// of keeping it alive for reuse.
fn run_on_dedicated_thread(params: DynamicParams, ctx: Arc<ScraperContext>) -> Result<String> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Runtime(e.into()))?;
    let local = tokio::task::LocalSet::new();
    rt.block_on(local.run_until(evaluate(params, ctx)))
}

async fn evaluate(params: DynamicParams, ctx: Arc<ScraperContext>) -> Result<String> {
    let mut extensions = core_extensions();
    extensions.push(context_extension(ctx));
    let mut runtime = Runtime::new(extensions);

    runtime
        .execute_script("user_source", &params.source_code)
        .map_err(Error::Runtime)?;

    let defines_handler: bool = runtime
        .run_expression("check_handler", "typeof handler === \"function\"")
        .map_err(Error::Runtime)?;
    if !defines_handler {
        return Err(Error::MissingHandlerFunction);
    }

    runtime.set_global_value("__kwargs", &params.kwargs)?;

    runtime
        .await_expression::<String>("invoke_handler", "handler(globalThis.ctx, __kwargs)")
        .await
}
