//! Runtime tunables
//!
//! Two knobs influence the buffer path: the number of back buffers allocated for client windows
//! and whether the client throttles itself with extra display round-trips while waiting for a
//! buffer to be released. Both are looked up in the driver hint store first and in the process
//! environment second.

use tracing::debug;

/// Smallest back-buffer ring a window may use
pub const MIN_BACK_BUFFERS: usize = 2;
/// Largest back-buffer ring a window may use
pub const MAX_BACK_BUFFERS: usize = 4;
/// Back-buffer ring size when nothing is configured
pub const DEFAULT_BACK_BUFFERS: usize = 3;

/// Hint store key for the back-buffer count
pub const HINT_NUM_BUFFERS: &str = "WseglNumBuffers";
/// Environment variable for the back-buffer count
pub const ENV_NUM_BUFFERS: &str = "WSEGL_NUM_BUFFERS";
/// Hint store key for aggressive sync
pub const HINT_AGGRESSIVE_SYNC: &str = "WseglEnableAggressiveSync";
/// Environment variable for aggressive sync
pub const ENV_AGGRESSIVE_SYNC: &str = "WSEGL_ENABLE_AGGRESSIVE_SYNC";

/// Source of driver-provided configuration hints
pub trait HintSource {
    /// Look up an integer hint, `None` if the store has no value for `key`
    fn hint(&self, key: &str) -> Option<u32>;
}

impl<F> HintSource for F
where
    F: Fn(&str) -> Option<u32>,
{
    fn hint(&self, key: &str) -> Option<u32> {
        self(key)
    }
}

/// Resolved tunables of a display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tunables {
    /// Number of back buffers allocated for every client window
    pub back_buffers: usize,
    /// Re-arm a display sync callback before every blocking dispatch while waiting for a release
    pub aggressive_sync: bool,
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            back_buffers: DEFAULT_BACK_BUFFERS,
            aggressive_sync: false,
        }
    }
}

impl Tunables {
    /// Resolve the tunables from the hint store and the process environment
    pub fn load(hints: &dyn HintSource) -> Tunables {
        Self::resolve(hints, |key| std::env::var(key).ok())
    }

    /// Resolve the tunables from the hint store and a custom environment lookup
    pub fn resolve(hints: &dyn HintSource, env: impl Fn(&str) -> Option<String>) -> Tunables {
        let lookup = |hint: &str, var: &str| -> Option<i64> {
            hints
                .hint(hint)
                .map(i64::from)
                .or_else(|| env(var).map(|value| parse_int(&value)))
        };

        let back_buffers = lookup(HINT_NUM_BUFFERS, ENV_NUM_BUFFERS)
            .map(|n| n.clamp(MIN_BACK_BUFFERS as i64, MAX_BACK_BUFFERS as i64) as usize)
            .unwrap_or(DEFAULT_BACK_BUFFERS);
        let aggressive_sync = lookup(HINT_AGGRESSIVE_SYNC, ENV_AGGRESSIVE_SYNC)
            .map(|v| v != 0)
            .unwrap_or(false);

        let tunables = Tunables {
            back_buffers,
            aggressive_sync,
        };
        debug!(?tunables, "Resolved tunables");
        tunables
    }
}

// Leading integer of the string, 0 if there is none.
fn parse_int(value: &str) -> i64 {
    let value = value.trim_start();
    let (sign, digits) = match value.as_bytes().first() {
        Some(b'-') => (-1, &value[1..]),
        Some(b'+') => (1, &value[1..]),
        _ => (1, value),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().map(|n| sign * n).unwrap_or(0)
}
