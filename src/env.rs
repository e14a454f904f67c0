use std::{cell::RefCell, ffi::OsStr};

#[derive(Clone, Copy)]
struct Env {
    trace: bool,
    max_steps: Option<u64>,
}

thread_local! {
    /// Must only be mutated within `set_env`
    static ENV: RefCell<Option<Env>> = const { RefCell::new(None) };
}

pub fn init() {
    let value = Env {
        trace: var_is("DUMB8_TRACE", "1"),
        max_steps: std::env::var("DUMB8_MAX_STEPS")
            .ok()
            .and_then(|v| parse_steps(&v)),
    };
    set_env(value);
}

/// `DUMB8_TRACE=1` prints every executed instruction.
pub fn trace_enabled() -> bool {
    with_env(|env| env.trace)
}

/// `DUMB8_MAX_STEPS=<n>` bounds every run unless `--max-steps` is given.
pub fn max_steps() -> Option<u64> {
    with_env(|env| env.max_steps)
}

fn set_env(value: Env) {
    ENV.with(|env| {
        let mut env = env.borrow_mut();
        assert!(
            env.is_none(),
            "tried to initialize environment state multiple times"
        );
        *env = Some(value);
    });
}

fn with_env<F, R>(callback: F) -> R
where
    F: Fn(&Env) -> R,
{
    ENV.with(|env| {
        let env = env.borrow();
        let env = env.unwrap_or_else(|| {
            panic!("tried to access environment state before initialization");
        });
        callback(&env)
    })
}

fn var_is(name: impl AsRef<OsStr>, value: impl AsRef<str>) -> bool {
    std::env::var(name.as_ref()).is_ok_and(|v| v == value.as_ref())
}

// Zero and garbage mean "no limit"
fn parse_steps(value: &str) -> Option<u64> {
    value.trim().parse().ok().filter(|&n| n > 0)
}
