/// Outcome of a dynamic (Variant) call, as reported by the engine.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CallErrorType {
    #[default]
    Ok = 0,
    InvalidMethod = 1,
    InvalidArgument = 2,
    TooManyArguments = 3,
    TooFewArguments = 4,
    InstanceIsNull = 5,
    MethodNotConst = 6,
}

/// Filled by `method_bind_call`, `variant_call` and custom callables.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CallError {
    pub error: CallErrorType,
    /// Index of the offending argument, or the expected count.
    pub argument: i32,
    /// Expected Variant type (for `InvalidArgument`) or argument count.
    pub expected: i32,
}

impl CallError {
    pub const OK: CallError = CallError {
        error: CallErrorType::Ok,
        argument: 0,
        expected: 0,
    };

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.error == CallErrorType::Ok
    }
}
