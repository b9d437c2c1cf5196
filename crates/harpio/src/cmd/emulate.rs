use crate::cmd::EmulateArgs;
use crate::exit::CliResult;

#[cfg(unix)]
pub fn run(args: EmulateArgs) -> CliResult<i32> {
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use harpio_device::{Emulator, EmulatorListener, Identity};

    use crate::exit::{device_error, CliError, INTERNAL, SUCCESS};

    let mut identity = Identity {
        who_am_i: args.who_am_i,
        ..Identity::default()
    };
    if let Some(name) = args.name {
        identity.device_name = name;
    }

    let mut listener = EmulatorListener::bind(&args.path, Emulator::new(identity))
        .map_err(|err| device_error("bind failed", err))?;
    tracing::info!(path = %listener.path().display(), "emulated device listening");

    // The flag is checked between connections; the wake-up connect unblocks
    // a pending accept so the socket file is removed on the way out.
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    let wake = listener.path().to_path_buf();
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
        let _ = UnixStream::connect(&wake);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;

    let served = listener
        .serve(&running, args.count)
        .map_err(|err| device_error("emulator failed", err))?;
    tracing::debug!(served, "emulator exiting");
    Ok(SUCCESS)
}

#[cfg(not(unix))]
pub fn run(_args: EmulateArgs) -> CliResult<i32> {
    Err(crate::exit::CliError::usage(
        "the emulator needs Unix domain sockets",
    ))
}
