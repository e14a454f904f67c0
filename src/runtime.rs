use crate::device::Device;
use crate::dprintln;
use crate::error::{Fault, LoadError};
use crate::isa::{Instr, Opcode, MEMORY_SIZE, REGISTER_COUNT};

/// Stored by `IN` once input is exhausted. Same as C's `EOF` truncated to a byte.
pub const EOF_BYTE: u8 = 0xFF;

/// Countdown armed by `CMP`. It is decremented at the start of every following instruction and
/// the equal flag is cleared when it reaches zero, so only the instruction directly after the
/// compare observes the flag.
const FLAG_CLEAR_DELAY: u8 = 2;

/// Represents complete processor state during runtime.
///
/// Each instance is independent; nothing is shared between processors.
pub struct RunState {
    /// Code and data share the one address space
    mem: [u8; MEMORY_SIZE],
    /// Program counter. Wider than an address so running off the end is detectable.
    pc: u16,
    /// 8x 8-bit registers
    reg: [u8; REGISTER_COUNT],
    halted: bool,
    /// Set by `CMP`, read by `JEQ`
    equal_flag: bool,
    flag_clear_delay: u8,

    /// Instructions executed so far
    steps: u64,
    max_steps: Option<u64>,
    trace: bool,
}

/// Copy of the externally visible processor state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Snapshot {
    pub registers: [u8; REGISTER_COUNT],
    pub pc: u16,
    pub halted: bool,
    pub equal_flag: bool,
    pub flag_clear_delay: u8,
    pub steps: u64,
}

/// An instruction that was executed, and where it was fetched from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Step {
    pub addr: u16,
    pub instr: Instr,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    /// Processor with zeroed memory and registers.
    pub fn new() -> Self {
        RunState {
            mem: [0; MEMORY_SIZE],
            pc: 0,
            reg: [0; REGISTER_COUNT],
            halted: false,
            equal_flag: false,
            flag_clear_delay: 0,
            steps: 0,
            max_steps: None,
            trace: false,
        }
    }

    /// Load a flat program image at address 0.
    pub fn from_raw(raw: &[u8]) -> Result<RunState, LoadError> {
        if raw.len() > MEMORY_SIZE {
            return Err(LoadError::TooLarge {
                size: raw.len(),
                max: MEMORY_SIZE,
            });
        }
        let mut state = RunState::new();
        state.mem[..raw.len()].copy_from_slice(raw);
        Ok(state)
    }

    /// Seed a register before running, eg. from a test harness.
    pub fn set_reg(&mut self, index: usize, value: u8) -> Result<(), LoadError> {
        let reg = self
            .reg
            .get_mut(index)
            .ok_or(LoadError::InvalidRegister { index })?;
        *reg = value;
        Ok(())
    }

    /// Fault with [`Fault::StepLimit`] after `limit` instructions. `None` runs forever.
    pub fn set_max_steps(&mut self, limit: Option<u64>) {
        self.max_steps = limit;
    }

    /// Print every executed instruction to stderr.
    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    pub fn reg(&self) -> &[u8; REGISTER_COUNT] {
        &self.reg
    }

    pub fn mem(&self) -> &[u8; MEMORY_SIZE] {
        &self.mem
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn equal_flag(&self) -> bool {
        self.equal_flag
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            registers: self.reg,
            pc: self.pc,
            halted: self.halted,
            equal_flag: self.equal_flag,
            flag_clear_delay: self.flag_clear_delay,
            steps: self.steps,
        }
    }

    /// Run until `HLT` or a fault. A fault always leaves the processor halted.
    pub fn run(&mut self, dev: &mut impl Device) -> Result<(), Fault> {
        while let Some(step) = self.step(dev)? {
            if self.trace {
                dprintln!("{:>3}: {}", step.addr, step.instr);
            }
        }
        Ok(())
    }

    /// Execute a single instruction. Returns `None` once halted.
    pub fn step(&mut self, dev: &mut impl Device) -> Result<Option<Step>, Fault> {
        if self.halted {
            return Ok(None);
        }
        let addr = self.pc;
        match self.exec(addr, dev) {
            Ok(instr) => {
                self.steps += 1;
                Ok(Some(Step { addr, instr }))
            }
            Err(fault) => {
                self.halted = true;
                Err(fault)
            }
        }
    }

    fn exec(&mut self, addr: u16, dev: &mut impl Device) -> Result<Instr, Fault> {
        if let Some(limit) = self.max_steps {
            if self.steps >= limit {
                return Err(Fault::StepLimit { limit, addr });
            }
        }

        // Runs before the next opcode is interpreted, not after `CMP`
        if self.flag_clear_delay > 0 {
            self.flag_clear_delay -= 1;
            if self.flag_clear_delay == 0 {
                self.equal_flag = false;
            }
        }

        let byte = self.fetch(addr)?;
        let opcode =
            Opcode::try_from(byte).map_err(|opcode| Fault::UnknownOpcode { opcode, addr })?;
        let arity = opcode.operands().len();
        let mut operands = [0; 2];
        for operand in &mut operands[..arity] {
            *operand = self.fetch(addr)?;
        }
        let [a, b] = operands;

        match opcode {
            Opcode::Nop => (),
            Opcode::Mov => {
                let val = self.get(b, addr)?;
                self.set(a, val, addr)?;
            }
            Opcode::Put => self.set(a, b, addr)?,
            Opcode::Add => self.alu(a, b, addr, u8::wrapping_add)?,
            Opcode::Sub => self.alu(a, b, addr, u8::wrapping_sub)?,
            Opcode::Mul => self.alu(a, b, addr, u8::wrapping_mul)?,
            Opcode::Div => {
                let dividend = self.get(a, addr)?;
                let divisor = self.get(b, addr)?;
                if divisor == 0 {
                    return Err(Fault::DivisionByZero { addr });
                }
                self.set(a, dividend / divisor, addr)?;
            }
            Opcode::Or => self.alu(a, b, addr, |x, y| x | y)?,
            Opcode::And => self.alu(a, b, addr, |x, y| x & y)?,
            Opcode::Xor => self.alu(a, b, addr, |x, y| x ^ y)?,
            Opcode::Out => {
                let val = self.get(a, addr)?;
                dev.write_byte(val).map_err(|err| Fault::Io {
                    message: err.to_string(),
                    addr,
                })?;
            }
            Opcode::In => {
                // Check the destination before consuming input
                self.get(a, addr)?;
                let val = dev.read_byte().map_err(|err| Fault::Io {
                    message: err.to_string(),
                    addr,
                })?;
                self.set(a, val.unwrap_or(EOF_BYTE), addr)?;
            }
            Opcode::Jmp => self.pc = a as u16,
            // Register operand is not read
            Opcode::Jeq => {
                if self.equal_flag {
                    self.pc = b as u16;
                }
            }
            Opcode::Cmp => {
                let lhs = self.get(a, addr)?;
                let rhs = self.get(b, addr)?;
                self.equal_flag = lhs == rhs;
                self.flag_clear_delay = FLAG_CLEAR_DELAY;
            }
            Opcode::Hlt => self.halted = true,
        }

        Ok(Instr::new(opcode, &operands[..arity]))
    }

    /// Read the byte at PC and advance PC.
    fn fetch(&mut self, addr: u16) -> Result<u8, Fault> {
        let pc = self.pc;
        let byte = *self
            .mem
            .get(pc as usize)
            .ok_or(Fault::PcOutOfBounds { pc, addr })?;
        self.pc += 1;
        Ok(byte)
    }

    fn get(&self, index: u8, addr: u16) -> Result<u8, Fault> {
        self.reg
            .get(index as usize)
            .copied()
            .ok_or(Fault::InvalidRegister { index, addr })
    }

    fn set(&mut self, index: u8, val: u8, addr: u16) -> Result<(), Fault> {
        let reg = self
            .reg
            .get_mut(index as usize)
            .ok_or(Fault::InvalidRegister { index, addr })?;
        *reg = val;
        Ok(())
    }

    /// `dest <- op(dest, src)`
    fn alu(
        &mut self,
        dest: u8,
        src: u8,
        addr: u16,
        op: impl Fn(u8, u8) -> u8,
    ) -> Result<(), Fault> {
        let lhs = self.get(dest, addr)?;
        let rhs = self.get(src, addr)?;
        self.set(dest, op(lhs, rhs), addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BufferDevice;

    fn run(program: &[u8]) -> (RunState, Result<(), Fault>) {
        let mut state = RunState::from_raw(program).unwrap();
        state.set_max_steps(Some(1000));
        let res = state.run(&mut BufferDevice::default());
        (state, res)
    }

    /// Seed registers, run, return registers.
    fn run_seeded(program: &[u8], seed: &[(usize, u8)]) -> [u8; REGISTER_COUNT] {
        let mut state = RunState::from_raw(program).unwrap();
        for &(index, value) in seed {
            state.set_reg(index, value).unwrap();
        }
        state.run(&mut BufferDevice::default()).unwrap();
        *state.reg()
    }

    #[test]
    fn halt_only() {
        let (state, res) = run(&[0xFF]);
        assert!(res.is_ok());
        assert!(state.halted());
        assert_eq!(state.pc(), 1);
        assert_eq!(state.steps(), 1);
        assert_eq!(state.reg(), &[0; 8]);
        assert!(!state.equal_flag());
    }

    #[test]
    fn put_and_out() {
        let mut state = RunState::from_raw(&[0xA1, 0, 65, 0xD0, 0, 0xFF]).unwrap();
        let mut dev = BufferDevice::default();
        state.run(&mut dev).unwrap();
        assert_eq!(dev.output(), b"A");
    }

    #[test]
    fn mov_copies() {
        let regs = run_seeded(&[0xA0, 1, 2, 0xFF], &[(2, 7)]);
        assert_eq!(regs[1], 7);
        assert_eq!(regs[2], 7);
    }

    #[test]
    fn arithmetic_wraps() {
        // 255 + 1
        assert_eq!(run_seeded(&[0xB0, 0, 1, 0xFF], &[(0, 255), (1, 1)])[0], 0);
        // 0 - 1
        assert_eq!(run_seeded(&[0xB1, 0, 1, 0xFF], &[(1, 1)])[0], 255);
        // 16 * 17
        assert_eq!(run_seeded(&[0xB2, 0, 1, 0xFF], &[(0, 16), (1, 17)])[0], 16);
        // 200 / 7
        assert_eq!(run_seeded(&[0xB3, 0, 1, 0xFF], &[(0, 200), (1, 7)])[0], 28);
    }

    #[test]
    fn bitwise() {
        let seed = [(0, 0b1100), (1, 0b1010)];
        assert_eq!(run_seeded(&[0xC0, 0, 1, 0xFF], &seed)[0], 0b1110);
        assert_eq!(run_seeded(&[0xC1, 0, 1, 0xFF], &seed)[0], 0b1000);
        assert_eq!(run_seeded(&[0xC2, 0, 1, 0xFF], &seed)[0], 0b0110);
    }

    #[test]
    fn same_register_operands() {
        assert_eq!(run_seeded(&[0xC2, 3, 3, 0xFF], &[(3, 99)])[3], 0);
        assert_eq!(run_seeded(&[0xB0, 3, 3, 0xFF], &[(3, 200)])[3], 144);
    }

    #[test]
    fn division_by_zero_faults_without_mutation() {
        let mut state = RunState::from_raw(&[0xB3, 0, 1, 0xFF]).unwrap();
        state.set_reg(0, 42).unwrap();
        let res = state.run(&mut BufferDevice::default());
        assert_eq!(res, Err(Fault::DivisionByZero { addr: 0 }));
        assert!(state.halted());
        assert_eq!(state.reg()[0], 42);
        assert_eq!(state.steps(), 0);
    }

    #[test]
    fn every_unknown_opcode_faults() {
        let known: Vec<u8> = Opcode::ALL.iter().map(|op| *op as u8).collect();
        for byte in (0..=u8::MAX).filter(|byte| !known.contains(byte)) {
            let (state, res) = run(&[0xFE, byte]);
            assert_eq!(res, Err(Fault::UnknownOpcode { opcode: byte, addr: 1 }));
            assert!(state.halted());
            assert_eq!(state.steps(), 1);
        }
    }

    #[test]
    fn empty_memory_faults_on_zero_opcode() {
        let (_, res) = run(&[]);
        assert_eq!(res, Err(Fault::UnknownOpcode { opcode: 0, addr: 0 }));
    }

    #[test]
    fn register_operand_out_of_range_faults() {
        let (state, res) = run(&[0xA1, 8, 1, 0xFF]);
        assert_eq!(res, Err(Fault::InvalidRegister { index: 8, addr: 0 }));
        assert!(state.halted());

        let (_, res) = run(&[0xFE, 0xB0, 0, 200, 0xFF]);
        assert_eq!(res, Err(Fault::InvalidRegister { index: 200, addr: 1 }));
    }

    #[test]
    fn jeq_ignores_its_register_operand() {
        // Register byte 200 would be out of range if it were read
        let (state, res) = run(&[0xE2, 0, 0, 0xE1, 200, 7, 0x00, 0xFF]);
        assert!(res.is_ok());
        assert_eq!(state.pc(), 8);
    }

    #[test]
    fn running_off_the_end_faults() {
        let mut program = vec![0xFE; MEMORY_SIZE];
        program[0] = 0xE0;
        program[1] = 254;
        let (state, res) = run(&program);
        assert_eq!(res, Err(Fault::PcOutOfBounds { pc: 256, addr: 256 }));
        assert!(state.halted());
    }

    #[test]
    fn truncated_operand_at_end_of_memory_faults() {
        let mut program = vec![0xFE; MEMORY_SIZE];
        program[0] = 0xE0;
        program[1] = 255;
        program[255] = 0xE0;
        let (_, res) = run(&program);
        assert_eq!(res, Err(Fault::PcOutOfBounds { pc: 256, addr: 255 }));
    }

    #[test]
    fn jmp() {
        // JMP 4 ; two unreachable zero bytes ; PUT R1, 9 ; HLT
        let (state, res) = run(&[0xE0, 4, 0x00, 0x00, 0xA1, 1, 9, 0xFF]);
        assert!(res.is_ok());
        assert_eq!(state.reg()[1], 9);
    }

    // Layout shared by the flag timing tests:
    //   0: CMP R0, R1
    //   3: <filler>
    //   n: JEQ R0, taken
    //      PUT R2, 1 ; HLT
    //   taken: PUT R2, 2 ; HLT
    fn flag_program(filler: usize) -> Vec<u8> {
        let mut program = vec![0xE2, 0, 1];
        program.extend(std::iter::repeat(0xFE).take(filler));
        let taken = (program.len() + 3 + 4) as u8;
        program.extend([0xE1, 0, taken]);
        program.extend([0xA1, 2, 1, 0xFF]);
        program.extend([0xA1, 2, 2, 0xFF]);
        program
    }

    #[test]
    fn jeq_directly_after_cmp_jumps() {
        assert_eq!(run_seeded(&flag_program(0), &[(0, 5), (1, 5)])[2], 2);
    }

    #[test]
    fn jeq_after_unequal_cmp_falls_through() {
        assert_eq!(run_seeded(&flag_program(0), &[(0, 5), (1, 6)])[2], 1);
    }

    #[test]
    fn flag_expires() {
        for filler in 1..4 {
            assert_eq!(
                run_seeded(&flag_program(filler), &[(0, 5), (1, 5)])[2],
                1,
                "flag still visible after {filler} instruction(s)"
            );
        }
    }

    #[test]
    fn flag_timing_per_instruction() {
        // CMP R0, R0 ; NOP ; NOP ; HLT
        let mut state = RunState::from_raw(&[0xE2, 0, 0, 0xFE, 0xFE, 0xFF]).unwrap();
        let mut dev = BufferDevice::default();

        state.step(&mut dev).unwrap();
        assert!(state.equal_flag());
        assert_eq!(state.snapshot().flag_clear_delay, 2);

        // The instruction right after the compare still sees the flag
        state.step(&mut dev).unwrap();
        assert!(state.equal_flag());
        assert_eq!(state.snapshot().flag_clear_delay, 1);

        // Cleared before the second instruction runs
        state.step(&mut dev).unwrap();
        assert!(!state.equal_flag());
        assert_eq!(state.snapshot().flag_clear_delay, 0);
    }

    #[test]
    fn cmp_rearms_countdown() {
        // CMP R0, R0 ; CMP R0, R0 ; JEQ R0, 10 ; HLT ; PUT R1, 1 ; HLT
        let program = [0xE2, 0, 0, 0xE2, 0, 0, 0xE1, 0, 10, 0xFF, 0xA1, 1, 1, 0xFF];
        assert_eq!(run_seeded(&program, &[])[1], 1);
    }

    #[test]
    fn input_and_end_of_input() {
        // IN R0 ; IN R1 ; HLT
        let mut state = RunState::from_raw(&[0xD1, 0, 0xD1, 1, 0xFF]).unwrap();
        let mut dev = BufferDevice::new(*b"x");
        state.run(&mut dev).unwrap();
        assert_eq!(state.reg()[0], b'x');
        assert_eq!(state.reg()[1], EOF_BYTE);
    }

    #[test]
    fn input_into_bad_register_consumes_nothing() {
        let mut state = RunState::from_raw(&[0xD1, 9]).unwrap();
        let mut dev = BufferDevice::new(*b"x");
        let res = state.run(&mut dev);
        assert_eq!(res, Err(Fault::InvalidRegister { index: 9, addr: 0 }));
        assert_eq!(dev.read_byte().unwrap(), Some(b'x'));
    }

    #[test]
    fn step_limit() {
        // JMP 0
        let mut state = RunState::from_raw(&[0xE0, 0]).unwrap();
        state.set_max_steps(Some(10));
        let res = state.run(&mut BufferDevice::default());
        assert_eq!(res, Err(Fault::StepLimit { limit: 10, addr: 0 }));
        assert_eq!(state.steps(), 10);
        assert!(state.halted());
    }

    #[test]
    fn step_after_halt_does_nothing() {
        let mut state = RunState::from_raw(&[0xFF]).unwrap();
        let mut dev = BufferDevice::default();
        let step = state.step(&mut dev).unwrap().unwrap();
        assert_eq!(step.addr, 0);
        assert_eq!(step.instr.opcode(), Opcode::Hlt);
        assert_eq!(state.step(&mut dev).unwrap(), None);
        assert_eq!(state.pc(), 1);
    }

    #[test]
    fn load_limits() {
        assert!(RunState::from_raw(&[0xFE; MEMORY_SIZE]).is_ok());
        assert_eq!(
            RunState::from_raw(&[0xFE; MEMORY_SIZE + 1]).err(),
            Some(LoadError::TooLarge { size: 257, max: 256 })
        );
        let mut state = RunState::new();
        assert_eq!(
            state.set_reg(8, 1),
            Err(LoadError::InvalidRegister { index: 8 })
        );
    }

    #[test]
    fn independent_instances() {
        let mut a = RunState::from_raw(&[0xA1, 0, 1, 0xFF]).unwrap();
        let b = RunState::from_raw(&[0xA1, 0, 2, 0xFF]).unwrap();
        a.run(&mut BufferDevice::default()).unwrap();
        assert_eq!(a.reg()[0], 1);
        assert_eq!(b.reg()[0], 0);
        assert!(!b.halted());
    }
}
