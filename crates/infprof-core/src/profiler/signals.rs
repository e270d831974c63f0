//! Scoped SIGINT/SIGTERM listener.
//!
//! A [`SignalGuard`] installs a flag-setting handler and saves the
//! disposition it replaced. When the last live guard is dropped the saved
//! disposition is put back, so a finished run leaves the process handling
//! signals exactly as before it started. Guards may overlap (concurrent
//! runs); a delivered signal wakes every live guard.

#[cfg(unix)]
pub use unix::SignalGuard;

#[cfg(not(unix))]
pub use fallback::SignalGuard;

#[cfg(unix)]
mod unix {
    use std::io;
    use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    use tokio::time::{Interval, MissedTickBehavior, interval};
    use tracing::debug;

    const WATCHED: [libc::c_int; 2] = [libc::SIGINT, libc::SIGTERM];

    /// How often a waiting guard checks for delivered signals.
    const POLL: Duration = Duration::from_millis(20);

    static LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);
    static DELIVERED: AtomicU64 = AtomicU64::new(0);
    static INSTALLED: Mutex<Installed> = Mutex::new(Installed {
        guards: 0,
        previous: Vec::new(),
    });

    struct Installed {
        guards: usize,
        previous: Vec<(libc::c_int, libc::sigaction)>,
    }

    // Only stores to atomics: async-signal-safe.
    extern "C" fn on_signal(sig: libc::c_int) {
        LAST_SIGNAL.store(sig, Ordering::SeqCst);
        DELIVERED.fetch_add(1, Ordering::SeqCst);
    }

    pub struct SignalGuard {
        seen: u64,
        poll: Interval,
    }

    impl SignalGuard {
        /// Installs the handlers if no other guard is live. Must be called
        /// inside a tokio runtime.
        pub fn install() -> io::Result<Self> {
            let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);
            if installed.guards == 0 {
                let mut previous = Vec::with_capacity(WATCHED.len());
                for sig in WATCHED {
                    match replace_action(sig) {
                        Ok(old) => previous.push((sig, old)),
                        Err(e) => {
                            restore(&previous);
                            return Err(e);
                        }
                    }
                }
                installed.previous = previous;
                debug!("Signal handlers installed");
            }
            installed.guards += 1;

            let mut poll = interval(POLL);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Ok(Self {
                seen: DELIVERED.load(Ordering::SeqCst),
                poll,
            })
        }

        /// Resolves with the signal's name once a watched signal arrives
        /// after this guard was installed or last returned. Cancel-safe.
        pub async fn recv(&mut self) -> &'static str {
            loop {
                self.poll.tick().await;
                let delivered = DELIVERED.load(Ordering::SeqCst);
                if delivered != self.seen {
                    self.seen = delivered;
                    return signal_name(LAST_SIGNAL.load(Ordering::SeqCst));
                }
            }
        }
    }

    impl Drop for SignalGuard {
        fn drop(&mut self) {
            let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);
            installed.guards = installed.guards.saturating_sub(1);
            if installed.guards == 0 {
                let previous = std::mem::take(&mut installed.previous);
                restore(&previous);
                debug!("Signal handlers restored");
            }
        }
    }

    fn signal_name(sig: libc::c_int) -> &'static str {
        match sig {
            libc::SIGINT => "SIGINT",
            libc::SIGTERM => "SIGTERM",
            _ => "signal",
        }
    }

    /// Installs `on_signal` for `sig` and returns the replaced action.
    fn replace_action(sig: libc::c_int) -> io::Result<libc::sigaction> {
        // SAFETY: both structs are zero-initialized before use and the
        // handler only touches atomics.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
            action.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);
            let mut old: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(sig, &action, &mut old) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(old)
        }
    }

    fn restore(previous: &[(libc::c_int, libc::sigaction)]) {
        for (sig, old) in previous {
            // SAFETY: `old` was filled in by sigaction for this signal.
            unsafe {
                libc::sigaction(*sig, old, std::ptr::null_mut());
            }
        }
    }

    /// Handler currently installed for `sig`.
    #[cfg(test)]
    pub(crate) fn current_handler(sig: libc::c_int) -> libc::sighandler_t {
        // SAFETY: query only; a null new action leaves the disposition alone.
        unsafe {
            let mut old: libc::sigaction = std::mem::zeroed();
            libc::sigaction(sig, std::ptr::null(), &mut old);
            old.sa_sigaction
        }
    }

    /// Live guards, for tests.
    #[cfg(test)]
    pub(crate) fn live_guards() -> usize {
        INSTALLED.lock().unwrap_or_else(PoisonError::into_inner).guards
    }

    /// Tests that change process-wide signal state run one at a time.
    #[cfg(test)]
    pub(crate) static SERIAL: Mutex<()> = Mutex::new(());

}

#[cfg(not(unix))]
mod fallback {
    use std::io;

    /// Ctrl-C listener; tokio owns the console handler on this platform.
    pub struct SignalGuard;

    impl SignalGuard {
        pub fn install() -> io::Result<Self> {
            Ok(Self)
        }

        pub async fn recv(&mut self) -> &'static str {
            match tokio::signal::ctrl_c().await {
                Ok(()) => "Ctrl-C",
                Err(_) => std::future::pending().await,
            }
        }
    }
}

#[cfg(all(test, unix))]
pub(crate) use unix::{SERIAL, current_handler, live_guards};
