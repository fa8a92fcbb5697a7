//! Dynamic EGL context provider.
//!
//! The driver library is opened at runtime and every entry point is
//! resolved by name up front; absence of any required symbol fails
//! bring-up before EGL is touched. The library handle is process-global
//! and closes when the last context drops its reference.

use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::{Arc, Mutex, Weak};

use libloading::os::unix::Symbol;
use libloading::Library;

use super::NativeContext;
use crate::core::errors::{CoreError, Result};
use crate::platform::backend::BackendSurface;
use crate::util::logging::PLATFORM;

pub type EGLDisplay = *mut c_void;
pub type EGLConfig = *mut c_void;
pub type EGLContext = *mut c_void;
pub type EGLSurface = *mut c_void;
pub type EGLint = i32;
pub type EGLenum = u32;
pub type EGLBoolean = u32;
pub type EGLNativeDisplayType = *mut c_void;
pub type EGLNativeWindowType = *mut c_void;

const EGL_FALSE: EGLBoolean = 0;
const EGL_NO_DISPLAY: EGLDisplay = ptr::null_mut();
const EGL_NO_CONTEXT: EGLContext = ptr::null_mut();
const EGL_NO_SURFACE: EGLSurface = ptr::null_mut();

const EGL_SUCCESS: EGLint = 0x3000;
const EGL_NOT_INITIALIZED: EGLint = 0x3001;
const EGL_BAD_ACCESS: EGLint = 0x3002;
const EGL_BAD_ALLOC: EGLint = 0x3003;
const EGL_BAD_ATTRIBUTE: EGLint = 0x3004;
const EGL_BAD_CONFIG: EGLint = 0x3005;
const EGL_BAD_CONTEXT: EGLint = 0x3006;
const EGL_BAD_CURRENT_SURFACE: EGLint = 0x3007;
const EGL_BAD_DISPLAY: EGLint = 0x3008;
const EGL_BAD_MATCH: EGLint = 0x3009;
const EGL_BAD_NATIVE_PIXMAP: EGLint = 0x300A;
const EGL_BAD_NATIVE_WINDOW: EGLint = 0x300B;
const EGL_BAD_PARAMETER: EGLint = 0x300C;
const EGL_BAD_SURFACE: EGLint = 0x300D;
const EGL_CONTEXT_LOST: EGLint = 0x300E;

const EGL_ALPHA_SIZE: EGLint = 0x3021;
const EGL_BLUE_SIZE: EGLint = 0x3022;
const EGL_GREEN_SIZE: EGLint = 0x3023;
const EGL_RED_SIZE: EGLint = 0x3024;
const EGL_DEPTH_SIZE: EGLint = 0x3025;
const EGL_SURFACE_TYPE: EGLint = 0x3033;
const EGL_NONE: EGLint = 0x3038;
const EGL_RENDERABLE_TYPE: EGLint = 0x3040;
const EGL_EXTENSIONS: EGLint = 0x3055;
const EGL_CONTEXT_CLIENT_VERSION: EGLint = 0x3098;

const EGL_WINDOW_BIT: EGLint = 0x0004;
const EGL_OPENGL_ES2_BIT: EGLint = 0x0004;
const EGL_OPENGL_ES_API: EGLenum = 0x30A0;

const LIBRARY_NAME: &str = "libEGL.so";

/// Window surface, at least 1 bit per color channel, no alpha, a depth
/// buffer, GL ES 2 renderable.
const CONFIG_ATTRIBS: [EGLint; 15] = [
    EGL_SURFACE_TYPE,
    EGL_WINDOW_BIT,
    EGL_RED_SIZE,
    1,
    EGL_GREEN_SIZE,
    1,
    EGL_BLUE_SIZE,
    1,
    EGL_ALPHA_SIZE,
    0,
    EGL_DEPTH_SIZE,
    1,
    EGL_RENDERABLE_TYPE,
    EGL_OPENGL_ES2_BIT,
    EGL_NONE,
];

const CONTEXT_ATTRIBS: [EGLint; 3] = [EGL_CONTEXT_CLIENT_VERSION, 2, EGL_NONE];

type GetErrorFn = unsafe extern "C" fn() -> EGLint;
type GetDisplayFn = unsafe extern "C" fn(EGLNativeDisplayType) -> EGLDisplay;
type InitializeFn = unsafe extern "C" fn(EGLDisplay, *mut EGLint, *mut EGLint) -> EGLBoolean;
type TerminateFn = unsafe extern "C" fn(EGLDisplay) -> EGLBoolean;
type QueryStringFn = unsafe extern "C" fn(EGLDisplay, EGLint) -> *const c_char;
type ChooseConfigFn =
    unsafe extern "C" fn(EGLDisplay, *const EGLint, *mut EGLConfig, EGLint, *mut EGLint) -> EGLBoolean;
type BindApiFn = unsafe extern "C" fn(EGLenum) -> EGLBoolean;
type CreateContextFn =
    unsafe extern "C" fn(EGLDisplay, EGLConfig, EGLContext, *const EGLint) -> EGLContext;
type DestroyContextFn = unsafe extern "C" fn(EGLDisplay, EGLContext) -> EGLBoolean;
type CreateWindowSurfaceFn =
    unsafe extern "C" fn(EGLDisplay, EGLConfig, EGLNativeWindowType, *const EGLint) -> EGLSurface;
type DestroySurfaceFn = unsafe extern "C" fn(EGLDisplay, EGLSurface) -> EGLBoolean;
type MakeCurrentFn =
    unsafe extern "C" fn(EGLDisplay, EGLSurface, EGLSurface, EGLContext) -> EGLBoolean;
type SwapBuffersFn = unsafe extern "C" fn(EGLDisplay, EGLSurface) -> EGLBoolean;
type BindWaylandDisplayFn = unsafe extern "C" fn(EGLDisplay, *mut c_void) -> EGLBoolean;

/// The fixed record of driver entry points.
struct EglApi {
    get_error: Symbol<GetErrorFn>,
    get_display: Symbol<GetDisplayFn>,
    initialize: Symbol<InitializeFn>,
    terminate: Symbol<TerminateFn>,
    query_string: Symbol<QueryStringFn>,
    choose_config: Symbol<ChooseConfigFn>,
    bind_api: Symbol<BindApiFn>,
    create_context: Symbol<CreateContextFn>,
    destroy_context: Symbol<DestroyContextFn>,
    create_window_surface: Symbol<CreateWindowSurfaceFn>,
    destroy_surface: Symbol<DestroySurfaceFn>,
    make_current: Symbol<MakeCurrentFn>,
    swap_buffers: Symbol<SwapBuffersFn>,

    /// Extension entry point, present only on Wayland-aware drivers.
    bind_wayland_display: Option<Symbol<BindWaylandDisplayFn>>,
}

impl EglApi {
    fn load(library: &Library) -> Result<Self> {
        fn required<T>(library: &Library, name: &'static str) -> Result<Symbol<T>> {
            // Safety: the signature types above match the EGL 1.4 ABI.
            match unsafe { library.get::<T>(name.as_bytes()) } {
                Ok(symbol) => Ok(unsafe { symbol.into_raw() }),
                Err(_) => {
                    tracing::error!(
                        target: PLATFORM,
                        "could not load function '{}' from '{}'",
                        name,
                        LIBRARY_NAME
                    );
                    Err(CoreError::SymbolMissing(name))
                }
            }
        }

        fn optional<T>(library: &Library, name: &'static str) -> Option<Symbol<T>> {
            unsafe { library.get::<T>(name.as_bytes()).map(|s| s.into_raw()).ok() }
        }

        Ok(Self {
            get_error: required(library, "eglGetError")?,
            get_display: required(library, "eglGetDisplay")?,
            initialize: required(library, "eglInitialize")?,
            terminate: required(library, "eglTerminate")?,
            query_string: required(library, "eglQueryString")?,
            choose_config: required(library, "eglChooseConfig")?,
            bind_api: required(library, "eglBindAPI")?,
            create_context: required(library, "eglCreateContext")?,
            destroy_context: required(library, "eglDestroyContext")?,
            create_window_surface: required(library, "eglCreateWindowSurface")?,
            destroy_surface: required(library, "eglDestroySurface")?,
            make_current: required(library, "eglMakeCurrent")?,
            swap_buffers: required(library, "eglSwapBuffers")?,
            bind_wayland_display: optional(library, "eglBindWaylandDisplayWL"),
        })
    }
}

/// Process-global library handle; closed when the last context drops its
/// `Arc`.
static LIBRARY: Mutex<Option<Weak<Library>>> = Mutex::new(None);

fn open_library() -> Result<Arc<Library>> {
    let mut slot = LIBRARY.lock().unwrap();

    if let Some(library) = slot.as_ref().and_then(Weak::upgrade) {
        return Ok(library);
    }

    // Safety: libEGL's initialization routines have no unusual
    // load-time requirements.
    let library = match unsafe { Library::new(LIBRARY_NAME) } {
        Ok(library) => Arc::new(library),
        Err(err) => {
            tracing::error!(target: PLATFORM, "could not open '{}': {}", LIBRARY_NAME, err);
            return Err(CoreError::LibraryNotFound(err.to_string()));
        }
    };

    *slot = Some(Arc::downgrade(&library));
    Ok(library)
}

/// Translate a driver error code to a human string.
fn error_string(error: EGLint) -> &'static str {
    match error {
        EGL_SUCCESS => "Success",
        EGL_NOT_INITIALIZED => "EGL is not or could not be initialized",
        EGL_BAD_ACCESS => "EGL cannot access a requested resource",
        EGL_BAD_ALLOC => "EGL failed to allocate resources for the requested operation",
        EGL_BAD_ATTRIBUTE => {
            "An unrecognized attribute or attribute value was passed in the attribute list"
        }
        EGL_BAD_CONTEXT => "An EGLContext argument does not name a valid EGL rendering context",
        EGL_BAD_CONFIG => {
            "An EGLConfig argument does not name a valid EGL frame buffer configuration"
        }
        EGL_BAD_CURRENT_SURFACE => {
            "The current surface of the calling thread is a window, pixel buffer or pixmap that is no longer valid"
        }
        EGL_BAD_DISPLAY => "An EGLDisplay argument does not name a valid EGL display connection",
        EGL_BAD_SURFACE => {
            "An EGLSurface argument does not name a valid surface configured for GL rendering"
        }
        EGL_BAD_MATCH => "Arguments are inconsistent",
        EGL_BAD_PARAMETER => "One or more argument values are invalid",
        EGL_BAD_NATIVE_PIXMAP => {
            "A NativePixmapType argument does not refer to a valid native pixmap"
        }
        EGL_BAD_NATIVE_WINDOW => {
            "A NativeWindowType argument does not refer to a valid native window"
        }
        EGL_CONTEXT_LOST => "The application must destroy all contexts and reinitialise",
        _ => "UNKNOWN EGL ERROR",
    }
}

/// Whole-token extension lookup. `"FOO"` does not match inside `"FOOBAR"`.
fn extension_present(extensions: &str, token: &str) -> bool {
    extensions.split_ascii_whitespace().any(|t| t == token)
}

pub struct EglContext {
    surface: BackendSurface,
    // Held for the lifetime of the resolved symbols.
    _library: Arc<Library>,
    api: EglApi,

    display: EGLDisplay,
    config: EGLConfig,
    context: EGLContext,
    window_surface: EGLSurface,
    extensions: String,
    version: (EGLint, EGLint),
    has_current: bool,
}

impl EglContext {
    /// Run the bring-up protocol against `surface`.
    ///
    /// Every step is fatal on failure: the captured error code is logged
    /// translated, partial state is torn down, and the error is returned.
    pub fn new(surface: BackendSurface) -> Result<Self> {
        let library = open_library()?;
        let api = EglApi::load(&library)?;

        let mut egl = Self {
            surface,
            _library: library,
            api,
            display: EGL_NO_DISPLAY,
            config: ptr::null_mut(),
            context: EGL_NO_CONTEXT,
            window_surface: EGL_NO_SURFACE,
            extensions: String::new(),
            version: (0, 0),
            has_current: false,
        };

        match egl.bring_up() {
            Ok(()) => {
                tracing::info!(
                    target: PLATFORM,
                    "EGL {}.{} ({}) context created",
                    egl.version.0,
                    egl.version.1,
                    egl.surface.name()
                );
                Ok(egl)
            }
            Err(err) => {
                tracing::error!(target: PLATFORM, "{}", err);
                egl.terminate();
                Err(err)
            }
        }
    }

    fn bring_up(&mut self) -> Result<()> {
        let display = unsafe { (*self.api.get_display)(self.surface.display()) };
        if display == EGL_NO_DISPLAY {
            return Err(CoreError::DisplayInitFailed(self.last_error().to_string()));
        }
        self.display = display;

        let (mut major, mut minor) = (0, 0);
        if unsafe { (*self.api.initialize)(display, &mut major, &mut minor) } == EGL_FALSE {
            return Err(CoreError::DisplayInitFailed(self.last_error().to_string()));
        }
        self.version = (major, minor);

        if unsafe { (*self.api.bind_api)(EGL_OPENGL_ES_API) } == EGL_FALSE {
            return Err(CoreError::DisplayInitFailed(self.last_error().to_string()));
        }

        let extensions = unsafe { (*self.api.query_string)(display, EGL_EXTENSIONS) };
        if !extensions.is_null() {
            self.extensions = unsafe { CStr::from_ptr(extensions) }
                .to_string_lossy()
                .into_owned();
        }

        let mut num_configs = 0;
        if unsafe {
            (*self.api.choose_config)(
                display,
                CONFIG_ATTRIBS.as_ptr(),
                &mut self.config,
                1,
                &mut num_configs,
            )
        } == EGL_FALSE
            || num_configs < 1
        {
            return Err(CoreError::ConfigChooseFailed(self.last_error().to_string()));
        }

        let context = unsafe {
            (*self.api.create_context)(display, self.config, EGL_NO_CONTEXT, CONTEXT_ATTRIBS.as_ptr())
        };
        if context == EGL_NO_CONTEXT {
            return Err(CoreError::ContextCreateFailed(self.last_error().to_string()));
        }
        self.context = context;

        let window_surface = unsafe {
            (*self.api.create_window_surface)(display, self.config, self.surface.window(), ptr::null())
        };
        if window_surface == EGL_NO_SURFACE {
            return Err(CoreError::SurfaceCreateFailed(self.last_error().to_string()));
        }
        self.window_surface = window_surface;

        if unsafe { (*self.api.make_current)(display, window_surface, window_surface, context) }
            == EGL_FALSE
        {
            return Err(CoreError::MakeCurrentFailed(self.last_error().to_string()));
        }
        self.has_current = true;

        Ok(())
    }

    fn last_error(&self) -> &'static str {
        error_string(unsafe { (*self.api.get_error)() })
    }

    pub fn has_extension(&self, token: &str) -> bool {
        extension_present(&self.extensions, token)
    }
}

impl NativeContext for EglContext {
    fn make_current(&mut self) -> Result<()> {
        if unsafe {
            (*self.api.make_current)(
                self.display,
                self.window_surface,
                self.window_surface,
                self.context,
            )
        } == EGL_FALSE
        {
            return Err(CoreError::MakeCurrentFailed(self.last_error().to_string()));
        }
        self.has_current = true;
        Ok(())
    }

    fn swap(&mut self) {
        unsafe {
            (*self.api.swap_buffers)(self.display, self.window_surface);
        }
        self.surface.page_flip();
    }

    fn poll_events(&mut self) {
        self.surface.poll_events();
    }

    fn event_fd(&self) -> Option<RawFd> {
        self.surface.event_fd()
    }

    fn bind_wl_display(&mut self, display: *mut c_void) -> bool {
        if !self.has_extension("EGL_WL_bind_wayland_display") {
            return false;
        }
        match &self.api.bind_wayland_display {
            Some(bind) => unsafe { (**bind)(self.display, display) != EGL_FALSE },
            None => false,
        }
    }

    fn terminate(&mut self) {
        if self.display != EGL_NO_DISPLAY {
            if self.has_current {
                unsafe {
                    (*self.api.make_current)(
                        self.display,
                        EGL_NO_SURFACE,
                        EGL_NO_SURFACE,
                        EGL_NO_CONTEXT,
                    );
                }
                self.has_current = false;
            }

            if self.window_surface != EGL_NO_SURFACE {
                unsafe {
                    (*self.api.destroy_surface)(self.display, self.window_surface);
                }
                self.window_surface = EGL_NO_SURFACE;
            }

            if self.context != EGL_NO_CONTEXT {
                unsafe {
                    (*self.api.destroy_context)(self.display, self.context);
                }
                self.context = EGL_NO_CONTEXT;
            }

            unsafe {
                (*self.api.terminate)(self.display);
            }
            self.display = EGL_NO_DISPLAY;
        }
        // The backend surface and the library handle are released when the
        // context value itself is dropped.
    }
}

impl Drop for EglContext {
    fn drop(&mut self) {
        self.terminate();
    }
}
