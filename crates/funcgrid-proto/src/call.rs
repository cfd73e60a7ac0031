//! Packed call identity.

use std::fmt;

/// Identity of one function invocation.
///
/// `client_id == 0` marks an external call (HTTP or gRPC origin);
/// nested calls from co-located workers carry the caller's client id.
/// The three fields pack into a 64-bit `full_call_id` used as the key
/// in the external-call table and in shared-memory region names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncCall {
    pub func_id: u16,
    pub client_id: u16,
    pub call_id: u32,
}

impl FuncCall {
    pub fn new(func_id: u16, client_id: u16, call_id: u32) -> Self {
        Self {
            func_id,
            client_id,
            call_id,
        }
    }

    /// Pack into the 64-bit identity: call_id in the high half,
    /// client_id and func_id in the low half.
    pub fn full_call_id(&self) -> u64 {
        (u64::from(self.call_id) << 32) | (u64::from(self.client_id) << 16) | u64::from(self.func_id)
    }

    pub fn from_full_call_id(full: u64) -> Self {
        Self {
            func_id: (full & 0xffff) as u16,
            client_id: ((full >> 16) & 0xffff) as u16,
            call_id: (full >> 32) as u32,
        }
    }

    /// Shared-memory file name holding this call's input payload.
    pub fn input_region_name(&self) -> String {
        format!("{}.i", self.full_call_id())
    }

    /// Shared-memory file name the callee writes its output to.
    pub fn output_region_name(&self) -> String {
        format!("{}.o", self.full_call_id())
    }
}

impl fmt::Display for FuncCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "func_id={} client_id={} call_id={}",
            self.func_id, self.client_id, self.call_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_call_id_round_trips() {
        let call = FuncCall::new(7, 3, 0xdead_beef);
        assert_eq!(FuncCall::from_full_call_id(call.full_call_id()), call);
    }

    #[test]
    fn full_call_id_layout() {
        let call = FuncCall::new(7, 0, 12);
        assert_eq!(call.full_call_id(), (12u64 << 32) | 7);
    }

    #[test]
    fn external_calls_with_distinct_call_ids_never_collide() {
        let a = FuncCall::new(7, 0, 1);
        let b = FuncCall::new(7, 0, 2);
        assert_ne!(a.full_call_id(), b.full_call_id());
    }

    #[test]
    fn region_names_use_decimal_full_id() {
        let call = FuncCall::new(1, 0, 0);
        assert_eq!(call.input_region_name(), "1.i");
        assert_eq!(call.output_region_name(), "1.o");
    }
}
