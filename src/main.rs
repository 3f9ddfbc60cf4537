mod cli;
mod logging;
mod runner;

use std::{io, os::fd::AsRawFd, process::ExitCode};

use clap::Parser;
use mmpoll::{utils::set_fd_nonblocking, Config, Poller};
use nix::sys::{
    signal::{SigSet, Signal},
    signalfd::{SfdFlags, SignalFd},
};

use crate::cli::Cli;
use crate::runner::Sink;

fn run(cli: Cli) -> mmpoll::Result<()> {
    let config = Config::load(&cli.config)?;
    logging::init(&config.log_level);
    tracing::debug!(?config, "loaded config");

    // Block the termination signals on this thread so they arrive through the
    // signalfd as ordinary readiness instead of interrupting epoll_wait.
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGTERM);
    mask.thread_block().map_err(io::Error::from)?;
    let signal_fd =
        SignalFd::with_flags(&mask, SfdFlags::SFD_CLOEXEC).map_err(io::Error::from)?;
    set_fd_nonblocking(signal_fd.as_raw_fd()).map_err(io::Error::from)?;

    let poller = Poller::from_conf(&config.poller)?;
    let mut sink = Sink::new(poller, cli.timeout_ms.unwrap_or(config.timeout_ms));
    sink.watch_signals(signal_fd)?;

    if config.socket.is_empty() {
        tracing::warn!("no sockets configured; waiting for a signal");
    }
    for socket in &config.socket {
        sink.bind(socket)?;
    }

    let stats = sink.run()?;
    tracing::info!(
        batches = stats.batches,
        datagrams = stats.datagrams,
        bytes = stats.bytes,
        "done"
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mmpoll: {e}");
            ExitCode::FAILURE
        }
    }
}
