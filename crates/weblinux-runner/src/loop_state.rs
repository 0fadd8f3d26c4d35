//! User-mode return path, as data.
//!
//! After the kernel entry for a syscall returns, the recorded tail code
//! selects one of four continuations. The sentinel errors that implement
//! the non-local ones are matched by message prefix.

use wasm_bindgen::JsValue;

use weblinux_abi::UserTail;

/// What the syscall trampoline does on the way back to user code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TailAction {
    /// Return the syscall value.
    Return,
    /// Run the signal-handler export on the kernel-managed stack, then
    /// return the syscall value.
    DeliverSignal { sig: i32 },
    /// Unwind the in-flight signal delivery.
    SignalReturn,
    /// Abort the current user module; the pre-loaded program replaces it.
    Exec,
}

pub(crate) fn action_for(tail: Option<(UserTail, i32)>) -> TailAction {
    match tail {
        None | Some((UserTail::Normal, _)) => TailAction::Return,
        Some((UserTail::DeliverSignal, sig)) => TailAction::DeliverSignal { sig },
        Some((UserTail::SignalReturn, _)) => TailAction::SignalReturn,
        Some((UserTail::Exec, _)) => TailAction::Exec,
    }
}

/// True when `err` is the given sentinel thrown through Wasm frames.
pub(crate) fn is_sentinel(err: &JsValue, which: &str) -> bool {
    match err.as_string() {
        Some(text) => sentinel_matches(&text, which),
        None => {
            // A sentinel rethrown by the engine may arrive as an Error
            // object; match on its message.
            js_sys::Reflect::get(err, &"message".into())
                .ok()
                .and_then(|v| v.as_string())
                .map(|text| sentinel_matches(&text, which))
                .unwrap_or(false)
        }
    }
}

fn sentinel_matches(text: &str, which: &str) -> bool {
    text.starts_with(which)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weblinux_abi::sentinel;

    #[test]
    fn tail_codes_select_actions() {
        assert_eq!(action_for(None), TailAction::Return);
        assert_eq!(
            action_for(Some((UserTail::Normal, 0))),
            TailAction::Return
        );
        assert_eq!(
            action_for(Some((UserTail::DeliverSignal, 9))),
            TailAction::DeliverSignal { sig: 9 }
        );
        assert_eq!(
            action_for(Some((UserTail::SignalReturn, 0))),
            TailAction::SignalReturn
        );
        assert_eq!(action_for(Some((UserTail::Exec, 0))), TailAction::Exec);
    }

    #[test]
    fn sentinel_prefixes_do_not_cross_match() {
        assert!(sentinel_matches(sentinel::EXEC, sentinel::EXEC));
        assert!(!sentinel_matches(sentinel::EXEC, sentinel::PANIC));
        assert!(!sentinel_matches(sentinel::SIGRETURN, sentinel::EXEC));
        assert!(!sentinel_matches("RuntimeError: unreachable", sentinel::PANIC));
    }
}
