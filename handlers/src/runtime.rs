use std::ops::{Deref, DerefMut};

use deno_core::{error::AnyError, JsRuntime};
use deno_web::BlobStore;
use serde::{de::DeserializeOwned, Serialize};
use serde_v8::{from_v8, to_v8};

use crate::{error::Error, permissions::Permissions};

/// Extensions for a sandbox with no filesystem or network access: console
/// output, URL parsing, the web platform's `TextEncoder`/`TextDecoder`/
/// `Blob`, and `crypto.getRandomValues`. No `deno_net`, no `deno_fetch`, no
/// module loader that could resolve a path off disk.
pub fn core_extensions() -> Vec<deno_core::Extension> {
    vec![
        deno_webidl::init(),
        deno_console::init(),
        deno_url::init(),
        deno_web::init::<Permissions>(BlobStore::default(), None),
        deno_crypto::init(None),
    ]
}

enum RetrievedV8Value<'s> {
    Value(v8::Local<'s, v8::Value>),
    Error(v8::Local<'s, v8::Value>),
    Promise(v8::Local<'s, v8::Promise>),
}

macro_rules! extract_promise {
    ($scope: expr, $v: expr) => {
        if $v.is_promise() {
            let promise = v8::Local::<v8::Promise>::try_from($v).unwrap();
            match promise.state() {
                v8::PromiseState::Pending => RetrievedV8Value::Promise(promise),
                v8::PromiseState::Fulfilled => RetrievedV8Value::Value(promise.result(&mut $scope)),
                v8::PromiseState::Rejected => RetrievedV8Value::Error(promise.result(&mut $scope)),
            }
        } else {
            RetrievedV8Value::Value($v)
        }
    };
}

pub struct Runtime {
    runtime: JsRuntime,
}

impl Deref for Runtime {
    type Target = JsRuntime;

    fn deref(&self) -> &Self::Target {
        &self.runtime
    }
}

impl DerefMut for Runtime {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.runtime
    }
}

impl Runtime {
    /// Builds a fresh isolate from source with the given extensions. No
    /// snapshot: every invocation pays isolate startup cost, which is the
    /// deliberate trade against keeping a pooled, snapshotted runtime around.
    pub fn new(extensions: Vec<deno_core::Extension>) -> Self {
        let deno_runtime = JsRuntime::new(deno_core::RuntimeOptions {
            extensions: Vec::new(),
            extensions_with_js: extensions,
            ..deno_core::RuntimeOptions::default()
        });

        Runtime {
            runtime: deno_runtime,
        }
    }

    pub fn run_expression<T: DeserializeOwned>(
        &mut self,
        name: &str,
        script: &str,
    ) -> Result<T, AnyError> {
        let result = self.runtime.execute_script(name, script)?;
        let mut scope = self.runtime.handle_scope();
        let local = v8::Local::new(&mut scope, result);
        let value = from_v8(&mut scope, local)?;
        Ok(value)
    }

    pub fn set_global_value<T: Serialize>(
        &mut self,
        key: &str,
        value: &T,
    ) -> Result<(), AnyError> {
        let mut scope = self.runtime.handle_scope();
        let jskey = v8::String::new(&mut scope, key).unwrap();
        let value = to_v8(&mut scope, value)?;
        let global = scope.get_current_context().global(&mut scope);
        global.set(&mut scope, jskey.into(), value);
        Ok(())
    }

    /// Runs an expression. If it returns a promise, drives the event loop
    /// until it settles and returns the resolved value (or the rejection).
    pub async fn await_expression<T: DeserializeOwned>(
        &mut self,
        name: &str,
        script: &str,
    ) -> Result<T, Error> {
        let result = self.runtime.execute_script(name, script)?;

        {
            let mut scope = self.runtime.handle_scope();
            let local = v8::Local::new(&mut scope, &result);
            match extract_promise!(scope, local) {
                RetrievedV8Value::Value(v) => return from_v8(&mut scope, v).map_err(Error::from),
                RetrievedV8Value::Error(e) => return Err(rejected_promise(&mut scope, e)),
                RetrievedV8Value::Promise(_) => {}
            }
        }

        self.runtime.run_event_loop(false).await?;

        let mut scope = self.runtime.handle_scope();
        let local = v8::Local::new(&mut scope, result);
        match extract_promise!(scope, local) {
            RetrievedV8Value::Value(v) => from_v8(&mut scope, v).map_err(Error::from),
            RetrievedV8Value::Error(e) => Err(rejected_promise(&mut scope, e)),
            RetrievedV8Value::Promise(_) => Err(Error::UnresolvedPromise),
        }
    }
}

fn rejected_promise(scope: &mut v8::HandleScope, v: v8::Local<v8::Value>) -> Error {
    let js_error = deno_core::error::JsError::from_v8_exception(scope, v);
    Error::RejectedPromise(js_error)
}
