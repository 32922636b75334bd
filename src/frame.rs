//! Call-frame model: one record per active function invocation.
//!
//! Grounded on `original_source/vm/frame.go`. A frame owns nothing but a
//! reference to the function it runs and its own instruction pointer; the
//! value stack and globals stay with the VM.

use std::rc::Rc;

use crate::object::CompiledFunction;

pub struct Frame {
    pub func: Rc<CompiledFunction>,
    pub ip: isize,
}

impl Frame {
    pub fn new(func: Rc<CompiledFunction>) -> Self {
        Frame { func, ip: -1 }
    }

    pub fn instructions(&self) -> &[u8] {
        &self.func.instructions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_frame_starts_ip_before_the_first_byte() {
        let func = Rc::new(CompiledFunction { instructions: vec![1, 2, 3] });
        let frame = Frame::new(func);
        assert_eq!(frame.ip, -1);
        assert_eq!(frame.instructions(), &[1, 2, 3]);
    }
}
