use crate::component::{Component, Process};
use libloading::Library;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Arc;

/// A typed construction parameter advertised by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Name → parameter mapping exchanged with a plugin's factory.
pub type CreateParams = HashMap<String, ParamValue>;

pub const CREATE_PARAMS_SYMBOL: &[u8] = b"GetCreateParams\0";
pub const CREATE_SYMBOL: &[u8] = b"Create\0";

type GetCreateParamsFn = unsafe extern "C" fn() -> *mut CreateParams;
type CreateFn = unsafe extern "C" fn(*const CreateParams) -> *mut Box<dyn Process>;

/// Host side of the shared-library component shim.
///
/// A plugin library exports two symbols, `GetCreateParams` and `Create`
/// (most easily via [`export_plugin!`](crate::export_plugin)). Failure is
/// reported by absence: a library that cannot be opened or lacks the
/// symbols leaves the plugin unloaded, and `create` returns `None`.
pub struct Plugin {
    lib: Option<Library>,
}

impl Plugin {
    pub fn load(path: impl AsRef<OsStr>) -> Self {
        let path = path.as_ref();
        let lib = match unsafe { Library::new(path) } {
            Ok(lib) => {
                let has_symbols = unsafe {
                    lib.get::<GetCreateParamsFn>(CREATE_PARAMS_SYMBOL).is_ok()
                        && lib.get::<CreateFn>(CREATE_SYMBOL).is_ok()
                };
                if has_symbols {
                    Some(lib)
                } else {
                    tracing::warn!(?path, "[Plugin] factory symbols missing");
                    None
                }
            }
            Err(err) => {
                tracing::warn!(?path, %err, "[Plugin] load failed");
                None
            }
        };
        Self { lib }
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.lib.is_some()
    }

    /// The plugin's advertised construction parameters, empty when not
    /// loaded.
    pub fn create_params(&self) -> CreateParams {
        let Some(lib) = &self.lib else {
            return CreateParams::default();
        };
        unsafe {
            match lib.get::<GetCreateParamsFn>(CREATE_PARAMS_SYMBOL) {
                Ok(get_params) => {
                    let raw = get_params();
                    if raw.is_null() {
                        CreateParams::default()
                    } else {
                        *Box::from_raw(raw)
                    }
                }
                Err(_) => CreateParams::default(),
            }
        }
    }

    /// Instantiate a component from the plugin's factory.
    pub fn create(&self, params: &CreateParams) -> Option<Arc<Component>> {
        let lib = self.lib.as_ref()?;
        unsafe {
            let create = lib.get::<CreateFn>(CREATE_SYMBOL).ok()?;
            let raw = create(params as *const CreateParams);
            if raw.is_null() {
                return None;
            }
            Some(Component::from_boxed(*Box::from_raw(raw)))
        }
    }
}

/// Generate the two factory exports on the plugin side.
///
/// ```ignore
/// flowrt::export_plugin!(
///     params: || flowrt::plugin::CreateParams::default(),
///     create: |_params| Some(Box::new(MyProcessor::default()) as Box<dyn flowrt::component::Process>)
/// );
/// ```
#[macro_export]
macro_rules! export_plugin {
    (params: $params_fn:expr, create: $create_fn:expr) => {
        #[unsafe(no_mangle)]
        #[allow(non_snake_case)]
        pub unsafe extern "C" fn GetCreateParams() -> *mut $crate::plugin::CreateParams {
            Box::into_raw(Box::new(($params_fn)()))
        }

        #[unsafe(no_mangle)]
        #[allow(non_snake_case)]
        pub unsafe extern "C" fn Create(
            params: *const $crate::plugin::CreateParams,
        ) -> *mut Box<dyn $crate::component::Process> {
            let params: Option<&$crate::plugin::CreateParams> =
                unsafe { params.as_ref() };
            match ($create_fn)(params) {
                Some(processor) => Box::into_raw(Box::new(processor)),
                None => std::ptr::null_mut(),
            }
        }
    };
}
