//! Interpreter host: owns the embedded guest runtime.
//!
//! The guest runtime is process-wide. Construct one [`InterpreterHost`] in the
//! application's top-level composition and pass `&InterpreterHost` down; every
//! [`GuestHandle`](crate::GuestHandle) borrows the host, so all handles are
//! gone before the runtime is finalized.
//!
//! ## Initialization
//!
//! 1. Build the [`SearchPath`] for the executable directory
//! 2. Pre-initialize with an isolated configuration in UTF-8 mode
//! 3. Set the program name and the explicit module search path
//! 4. Initialize the runtime from that configuration
//! 5. Log the effective `sys.path`
//!
//! Anything that fails before step 2 is reported as a [`HostError`]. Failures
//! from step 2 onwards terminate the process through the guest's own exit
//! routine: a half-initialized runtime cannot be recovered in-process.
//!
//! ## Threads
//!
//! The thread that constructs the host holds the guest interpreter lock and is
//! the only thread allowed to use the facade. The host is neither `Send` nor
//! `Sync`; use [`InterpreterHost::without_lock`] around blocking host work.

use crate::config::HostConfig;
use crate::error::{HostError, HostResult};
use crate::facade::WideString;
use crate::handle::GuestHandle;
use crate::search_path::SearchPath;
use pyo3::ffi;
use std::ffi::CStr;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::path::Path;
use std::ptr::addr_of_mut;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, error, info, warn};

const UNINITIALIZED: u8 = 0;
const INITIALIZED: u8 = 1;
const FINALIZED: u8 = 2;

static HOST_STATE: AtomicU8 = AtomicU8::new(UNINITIALIZED);

/// Lifecycle of the process-wide guest runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    /// No host has been constructed yet.
    Uninitialized,
    /// A host is alive.
    Initialized,
    /// The host was dropped and the runtime finalized.
    Finalized,
}

/// The embedded guest runtime.
pub struct InterpreterHost {
    config: HostConfig,
    search_path: SearchPath,
    _not_send: PhantomData<*mut ()>,
}

impl InterpreterHost {
    /// Initialize the guest runtime with the default configuration.
    pub fn new(exe_dir: impl AsRef<Path>) -> HostResult<Self> {
        Self::with_config(exe_dir, HostConfig::default())
    }

    /// Initialize the guest runtime.
    ///
    /// Only one host may ever be constructed per process; later attempts,
    /// including after the first host was dropped, fail with
    /// [`HostError::AlreadyInitialized`].
    pub fn with_config(exe_dir: impl AsRef<Path>, config: HostConfig) -> HostResult<Self> {
        let exe_dir = exe_dir.as_ref();
        config.validate()?;

        let search_path = SearchPath::build(&config, exe_dir);
        let wide_paths = search_path.to_wide()?;
        let program_name = WideString::from(config.program_name.as_str());

        if Self::state() != HostState::Uninitialized {
            return Err(HostError::AlreadyInitialized);
        }
        if unsafe { ffi::Py_IsInitialized() } != 0 {
            return Err(HostError::RuntimeAlreadyActive);
        }

        HOST_STATE
            .compare_exchange(UNINITIALIZED, INITIALIZED, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| HostError::AlreadyInitialized)?;

        info!(
            "Guest stdlib: {} platform config: {} runtime dir: {} exe dir: {}",
            config.stdlib_dir.display(),
            config.platform_tag,
            config.runtime_lib_dir.display(),
            exe_dir.display()
        );

        unsafe {
            pre_initialize();
            initialize(&program_name, &wide_paths);
        }

        let host = Self {
            config,
            search_path,
            _not_send: PhantomData,
        };

        for entry in host.effective_search_path() {
            info!("sys.path: {}", entry);
        }

        Ok(host)
    }

    /// Current lifecycle state of the process-wide runtime.
    pub fn state() -> HostState {
        match HOST_STATE.load(Ordering::Acquire) {
            UNINITIALIZED => HostState::Uninitialized,
            INITIALIZED => HostState::Initialized,
            _ => HostState::Finalized,
        }
    }

    /// The configuration the runtime was initialized with.
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// The module search path handed to the runtime.
    pub fn search_path(&self) -> &SearchPath {
        &self.search_path
    }

    /// Snapshot of the guest's `sys.path` as seen right now.
    pub fn effective_search_path(&self) -> Vec<String> {
        // Borrowed reference owned by the sys module.
        let list = unsafe { ffi::PySys_GetObject(c"path".as_ptr()) };
        if list.is_null() {
            return Vec::new();
        }

        let len = unsafe { ffi::PyList_Size(list) };
        if len < 0 {
            unsafe { ffi::PyErr_Clear() };
            return Vec::new();
        }

        (0..len)
            .filter_map(|i| {
                let item = unsafe { ffi::PyList_GetItem(list, i) };
                unsafe { utf8_of(item) }
            })
            .collect()
    }

    /// Run blocking host work with the guest interpreter lock released.
    ///
    /// The closure must be `Send`, so it cannot capture handles or the host.
    pub fn without_lock<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T + Send,
        T: Send,
    {
        struct Restore(*mut ffi::PyThreadState);

        impl Drop for Restore {
            fn drop(&mut self) {
                unsafe { ffi::PyEval_RestoreThread(self.0) };
            }
        }

        let _restore = Restore(unsafe { ffi::PyEval_SaveThread() });
        f()
    }
}

impl Drop for InterpreterHost {
    fn drop(&mut self) {
        let live = GuestHandle::live_count();
        if live > 0 {
            warn!("Finalizing guest runtime with {} live handle(s)", live);
        }

        unsafe { ffi::Py_Finalize() };
        HOST_STATE.store(FINALIZED, Ordering::Release);
        info!("Guest runtime finalized");
    }
}

/// Pre-initialize the runtime in isolated UTF-8 mode.
unsafe fn pre_initialize() {
    let mut pre_config = MaybeUninit::<ffi::PyPreConfig>::uninit();
    ffi::PyPreConfig_InitIsolatedConfig(pre_config.as_mut_ptr());
    let mut pre_config = pre_config.assume_init();
    pre_config.utf8_mode = 1;

    let status = ffi::Py_PreInitialize(&pre_config);
    if ffi::PyStatus_Exception(status) != 0 {
        exit_with_status(status, None);
    }
}

/// Initialize the runtime from an isolated configuration.
unsafe fn initialize(program_name: &WideString, paths: &[WideString]) {
    let mut config = MaybeUninit::<ffi::PyConfig>::uninit();
    ffi::PyConfig_InitIsolatedConfig(config.as_mut_ptr());
    let config = config.as_mut_ptr();

    let status = ffi::PyConfig_SetString(
        config,
        addr_of_mut!((*config).program_name),
        program_name.as_nul_terminated().as_ptr(),
    );
    if ffi::PyStatus_Exception(status) != 0 {
        exit_with_status(status, Some(config));
    }

    (*config).module_search_paths_set = 1;
    for (index, path) in paths.iter().enumerate() {
        let status = ffi::PyWideStringList_Append(
            addr_of_mut!((*config).module_search_paths),
            path.as_nul_terminated().as_ptr(),
        );
        if ffi::PyStatus_Exception(status) != 0 {
            exit_with_status(status, Some(config));
        }
        debug!("Appended search path entry {}", index);
    }

    let status = ffi::Py_InitializeFromConfig(config);
    if ffi::PyStatus_Exception(status) != 0 {
        exit_with_status(status, Some(config));
    }

    ffi::PyConfig_Clear(config);
}

/// Clear the configuration, if any, and terminate through the guest.
unsafe fn exit_with_status(status: ffi::PyStatus, config: Option<*mut ffi::PyConfig>) -> ! {
    let message = if status.err_msg.is_null() {
        "unknown failure".into()
    } else {
        CStr::from_ptr(status.err_msg).to_string_lossy()
    };
    error!("Guest runtime initialization failed: {}", message);

    if let Some(config) = config {
        ffi::PyConfig_Clear(config);
    }
    ffi::Py_ExitStatusException(status)
}

/// Copy a guest string object into a host string.
///
/// # Safety
///
/// `object` must be null or a live guest object.
pub(crate) unsafe fn utf8_of(object: *mut ffi::PyObject) -> Option<String> {
    if object.is_null() {
        return None;
    }

    let mut size: ffi::Py_ssize_t = 0;
    let data = ffi::PyUnicode_AsUTF8AndSize(object, &mut size);
    if data.is_null() {
        ffi::PyErr_Clear();
        return None;
    }

    let bytes = std::slice::from_raw_parts(data as *const u8, size as usize);
    Some(String::from_utf8_lossy(bytes).into_owned())
}
