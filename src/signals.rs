//! # Signal name lookup.
//!
//! The `kill` control operation accepts either a symbolic name (`"SIGTERM"`,
//! `"TERM"`, case-insensitive) or a decimal signal number (`"15"`). This
//! module maps both forms to the raw signal number, and numbers back to
//! names for logging.

/// Signals the lookup table knows about.
const SIGNALS: &[(&str, i32)] = &[
    ("HUP", libc::SIGHUP),
    ("INT", libc::SIGINT),
    ("QUIT", libc::SIGQUIT),
    ("ILL", libc::SIGILL),
    ("TRAP", libc::SIGTRAP),
    ("ABRT", libc::SIGABRT),
    ("BUS", libc::SIGBUS),
    ("FPE", libc::SIGFPE),
    ("KILL", libc::SIGKILL),
    ("USR1", libc::SIGUSR1),
    ("SEGV", libc::SIGSEGV),
    ("USR2", libc::SIGUSR2),
    ("PIPE", libc::SIGPIPE),
    ("ALRM", libc::SIGALRM),
    ("TERM", libc::SIGTERM),
    ("CHLD", libc::SIGCHLD),
    ("CONT", libc::SIGCONT),
    ("STOP", libc::SIGSTOP),
    ("TSTP", libc::SIGTSTP),
    ("TTIN", libc::SIGTTIN),
    ("TTOU", libc::SIGTTOU),
    ("URG", libc::SIGURG),
    ("XCPU", libc::SIGXCPU),
    ("XFSZ", libc::SIGXFSZ),
    ("VTALRM", libc::SIGVTALRM),
    ("PROF", libc::SIGPROF),
    ("WINCH", libc::SIGWINCH),
    ("SYS", libc::SIGSYS),
];

/// Resolves a signal name or decimal number to its raw value.
///
/// Accepts `"SIGTERM"`, `"term"`, and `"15"` alike. Returns `None` for
/// unknown names and out-of-range numbers.
pub fn lookup(name_or_number: &str) -> Option<i32> {
    let s = name_or_number.trim();
    if let Ok(n) = s.parse::<i32>() {
        return if (1..=libc::SIGSYS).contains(&n) {
            Some(n)
        } else {
            None
        };
    }
    let upper = s.to_ascii_uppercase();
    let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
    SIGNALS
        .iter()
        .find(|(name, _)| *name == bare)
        .map(|(_, num)| *num)
}

/// Symbolic name for a raw signal number, if known.
pub fn name(signum: i32) -> Option<&'static str> {
    SIGNALS
        .iter()
        .find(|(_, num)| *num == signum)
        .map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_accepts_all_three_forms() {
        assert_eq!(lookup("SIGTERM"), Some(libc::SIGTERM));
        assert_eq!(lookup("term"), Some(libc::SIGTERM));
        assert_eq!(lookup("15"), Some(libc::SIGTERM));
    }

    #[test]
    fn lookup_rejects_unknown() {
        assert_eq!(lookup("SIGBOGUS"), None);
        assert_eq!(lookup("0"), None);
        assert_eq!(lookup("-9"), None);
        assert_eq!(lookup("4096"), None);
    }

    #[test]
    fn name_round_trips() {
        assert_eq!(name(libc::SIGKILL), Some("KILL"));
        assert_eq!(name(0), None);
    }
}
