//! Drive a client window against the recording transports and print what the renderer would see
//!
//! Run with `RUST_LOG=wsglue=trace` to follow the buffer turnover.

use wsglue::{
    backend::{
        device::DeviceSession,
        test::{DummyDriver, DummyPlatform, DummyWindow},
    },
    config::HINT_NUM_BUFFERS,
    format::CONFIGS,
    utils::{Gl, Rectangle},
    ws::{Display, NativeWindow, WindowSystem},
};

fn main() -> Result<(), wsglue::WsError> {
    if let Ok(env_filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().init();
    }

    let buffers = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(3);
    let platform = DummyPlatform::default();
    let session = DeviceSession::new(DummyDriver::default().with_hint(HINT_NUM_BUFFERS, buffers));
    let mut display = Display::initialise(&platform, &session, None)?;

    let window = DummyWindow::new(1, 320, 240);
    let drawable = display.create_window(&CONFIGS[0], NativeWindow::Client(window))?;
    display.set_swap_interval(drawable, 0)?;

    for frame in 0..8 {
        let (source, render) = display.get_drawable_params(drawable)?;
        println!(
            "frame {frame}: render {:#x} age {}, source {:#x}",
            render.address.0, render.buffer_age, source.address.0
        );
        let damage = [Rectangle::<i32, Gl>::from_loc_and_size((0, 0), (32, 32))];
        display.swap_drawable(drawable, &damage, None)?;

        // the server keeps the front buffer and hands back the one before it
        let attached = platform.client.attached_buffers();
        if let Some(previous) = attached.len().checked_sub(2).map(|i| attached[i]) {
            platform.client.release(previous);
        }
    }

    display.delete_drawable(drawable)?;
    display.close();
    Ok(())
}
