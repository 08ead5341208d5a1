use std::{cell::RefCell, collections::BTreeMap, rc::Rc, sync::Arc};

use deno_core::{error::AnyError, op, Extension, OpState};
use scrapeworks_context::{RequestOptions, ScraperContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::console::{ConsoleLevel, ConsoleMessage};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RequestArgs {
    headers: BTreeMap<String, String>,
    json: Option<Value>,
    body: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResponseResult {
    status: u16,
    headers: BTreeMap<String, String>,
    body: String,
}

#[op]
async fn op_ctx_request(
    state: Rc<RefCell<OpState>>,
    method: String,
    url: String,
    args: RequestArgs,
) -> Result<ResponseResult, AnyError> {
    let ctx = state.borrow().borrow::<Arc<ScraperContext>>().clone();

    let opts = RequestOptions {
        headers: args.headers,
        json: args.json,
        body: args.body,
        ..Default::default()
    };

    let response = match method.to_ascii_uppercase().as_str() {
        "GET" => ctx.get(&url, opts).await,
        "POST" => ctx.post(&url, opts).await,
        "PUT" => ctx.put(&url, opts).await,
        "DELETE" => ctx.delete(&url, opts).await,
        "HEAD" => ctx.head(&url, opts).await,
        "OPTIONS" => ctx.options(&url, opts).await,
        "PATCH" => ctx.patch(&url, opts).await,
        other => return Err(AnyError::msg(format!("unsupported HTTP method {other}"))),
    }
    .map_err(|e| AnyError::msg(e.to_string()))?;

    let status = response.status.as_u16();
    let headers = response
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    let body = response
        .text()
        .await
        .map_err(|e| AnyError::msg(e.to_string()))?;

    Ok(ResponseResult {
        status,
        headers,
        body,
    })
}

#[op]
fn op_ctx_params(state: &mut OpState) -> Result<Value, AnyError> {
    Ok(state.borrow::<Arc<ScraperContext>>().params.clone())
}

#[op]
fn op_handler_console(_state: &mut OpState, message: String, level: usize) -> Result<(), AnyError> {
    crate::console::emit(ConsoleMessage {
        level: ConsoleLevel::from(level),
        time: chrono::Utc::now(),
        message,
    });
    Ok(())
}

const BOOTSTRAP_JS: &str = r##"
    globalThis.console = {
        debug: (...args) => Deno.core.ops.op_handler_console(args.map(String).join(" "), 0),
        log: (...args) => Deno.core.ops.op_handler_console(args.map(String).join(" "), 1),
        info: (...args) => Deno.core.ops.op_handler_console(args.map(String).join(" "), 1),
        warn: (...args) => Deno.core.ops.op_handler_console(args.map(String).join(" "), 2),
        error: (...args) => Deno.core.ops.op_handler_console(args.map(String).join(" "), 3),
    };

    globalThis.ctx = {
        params: Deno.core.ops.op_ctx_params(),
        get: (url, opts) => Deno.core.opAsync("op_ctx_request", "GET", url, opts || {}),
        post: (url, opts) => Deno.core.opAsync("op_ctx_request", "POST", url, opts || {}),
        put: (url, opts) => Deno.core.opAsync("op_ctx_request", "PUT", url, opts || {}),
        delete: (url, opts) => Deno.core.opAsync("op_ctx_request", "DELETE", url, opts || {}),
        head: (url, opts) => Deno.core.opAsync("op_ctx_request", "HEAD", url, opts || {}),
        options: (url, opts) => Deno.core.opAsync("op_ctx_request", "OPTIONS", url, opts || {}),
        patch: (url, opts) => Deno.core.opAsync("op_ctx_request", "PATCH", url, opts || {}),
    };
"##;

/// Binds the running scraper context into the isolate.
pub fn context_extension(ctx: Arc<ScraperContext>) -> Extension {
    Extension::builder()
        .js(vec![("scrapeworks:bootstrap", BOOTSTRAP_JS)])
        .ops(vec![
            op_ctx_request::decl(),
            op_ctx_params::decl(),
            op_handler_console::decl(),
        ])
        .state(move |state| {
            state.put(ctx.clone());
            Ok(())
        })
        .build()
}
