//! Trust boundary between callers and the loader's own mechanics.
//!
//! Internal resolution and definition take a [`Privileged`] token. Only this
//! crate can mint one, so the privileged surface is closed to callers; the
//! public operations that enter it are the narrow ones on the resolver,
//! loader, handle, and bootstrapper.

/// Proof of running inside the loader's privileged scope.
#[derive(Debug)]
pub struct Privileged {
    _private: (),
}

/// Run `f` inside the loader's privileged scope.
///
/// The scope is independent of whoever called into the loader.
pub(crate) fn privileged<T>(scope: &'static str, f: impl FnOnce(&Privileged) -> T) -> T {
    let span = tracing::trace_span!("privileged", scope);
    let _enter = span.enter();
    f(&Privileged { _private: () })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privileged_returns_scope_result() {
        let value = privileged("test", |_token| 42);
        assert_eq!(value, 42);
    }
}
