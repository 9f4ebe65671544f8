//! Register-level implementation of [`DlHardware`].

use super::{AddressingMode, CyclingMode, DlChannel, DlHardware, HwProgram, RegisterIo};

/// Addresses and bits of the display list control registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DlRegisterMap {
    /// Command register of output 0; one register per output
    pub cmd_base: u32,
    /// Header update pending bit of the command register
    pub cmd_updhdr: u32,
    /// Display list control register
    pub ctrl: u32,
    /// Header address register of output 0; one register per output
    pub hdr_addr_base: u32,
    /// Byte swap control register
    pub swap: u32,
    /// Body size register (headerless mode)
    pub body_size: u32,
    /// Update pending bit of the body size register
    pub body_size_upd: u32,
    /// Value written to the control register for single-shot operation
    pub ctrl_single_shot: u32,
    /// Bits added to the control register for continuous operation
    pub ctrl_continuous: u32,
    /// Value written to the byte swap register
    pub swap_value: u32,
}

mod vsp1 {
    pub(super) const CMD: u32 = 0x0000;
    pub(super) const CMD_UPDHDR: u32 = 1 << 4;

    pub(super) const DL_CTRL: u32 = 0x0100;
    pub(super) const DL_CTRL_AR_WAIT_SHIFT: u32 = 16;
    pub(super) const DL_CTRL_DC2: u32 = 1 << 12;
    pub(super) const DL_CTRL_DC1: u32 = 1 << 8;
    pub(super) const DL_CTRL_DC0: u32 = 1 << 4;
    pub(super) const DL_CTRL_CFM0: u32 = 1 << 2;
    pub(super) const DL_CTRL_NH0: u32 = 1 << 1;
    pub(super) const DL_CTRL_DLE: u32 = 1 << 0;

    pub(super) const DL_HDR_ADDR: u32 = 0x0104;
    pub(super) const DL_SWAP: u32 = 0x0114;
    pub(super) const DL_SWAP_LWS: u32 = 1 << 2;

    pub(super) const DL_BODY_SIZE: u32 = 0x0120;
    pub(super) const DL_BODY_SIZE_UPD: u32 = 1 << 24;
}

impl DlRegisterMap {
    /// Register layout of the R-Car VSP1 display list unit.
    pub const VSP1: Self = Self {
        cmd_base: vsp1::CMD,
        cmd_updhdr: vsp1::CMD_UPDHDR,
        ctrl: vsp1::DL_CTRL,
        hdr_addr_base: vsp1::DL_HDR_ADDR,
        swap: vsp1::DL_SWAP,
        body_size: vsp1::DL_BODY_SIZE,
        body_size_upd: vsp1::DL_BODY_SIZE_UPD,
        ctrl_single_shot: (256 << vsp1::DL_CTRL_AR_WAIT_SHIFT)
            | vsp1::DL_CTRL_DC2
            | vsp1::DL_CTRL_DC1
            | vsp1::DL_CTRL_DC0
            | vsp1::DL_CTRL_DLE,
        ctrl_continuous: vsp1::DL_CTRL_CFM0 | vsp1::DL_CTRL_NH0,
        swap_value: vsp1::DL_SWAP_LWS,
    };

    /// Command register of `index`.
    pub const fn cmd(&self, index: u32) -> u32 {
        self.cmd_base + index * 4
    }

    /// Header address register of `index`.
    pub const fn hdr_addr(&self, index: u32) -> u32 {
        self.hdr_addr_base + index * 4
    }
}

impl Default for DlRegisterMap {
    fn default() -> Self {
        Self::VSP1
    }
}

/// [`DlHardware`] over memory-mapped display list registers.
pub struct DlRegisters<R: RegisterIo> {
    io: R,
    map: DlRegisterMap,
}

impl<R: RegisterIo> DlRegisters<R> {
    /// Drive the VSP1 register layout through `io`.
    pub fn new(io: R) -> Self {
        Self::with_map(io, DlRegisterMap::VSP1)
    }

    pub fn with_map(io: R, map: DlRegisterMap) -> Self {
        Self { io, map }
    }

    pub fn io(&self) -> &R {
        &self.io
    }

    pub fn map(&self) -> &DlRegisterMap {
        &self.map
    }
}

impl<R: RegisterIo> DlHardware for DlRegisters<R> {
    fn update_pending(&self, channel: DlChannel) -> bool {
        // The device clears UPD (headerless) or UPDHDR (header) once it has
        // taken the update.
        match channel.mode {
            AddressingMode::Headerless => {
                self.io.read(self.map.body_size) & self.map.body_size_upd != 0
            }
            AddressingMode::Header => {
                self.io.read(self.map.cmd(channel.index)) & self.map.cmd_updhdr != 0
            }
        }
    }

    fn enqueue(&self, channel: DlChannel, program: HwProgram) {
        match program {
            HwProgram::Headerless { body, size } => {
                // Headerless lists always go through output 0's registers.
                self.io.write(self.map.hdr_addr(0), body.as_u32());
                self.io.write(self.map.body_size, self.map.body_size_upd | size);
            }
            HwProgram::Header { header } => {
                // An idle device starts on its own; a running one latches
                // the address for the next frame.
                self.io.write(self.map.hdr_addr(channel.index), header.as_u32());
            }
        }
    }

    fn setup(&self, cycling: CyclingMode) {
        let mut ctrl = self.map.ctrl_single_shot;
        if cycling == CyclingMode::Continuous {
            ctrl |= self.map.ctrl_continuous;
        }

        self.io.write(self.map.ctrl, ctrl);
        self.io.write(self.map.swap, self.map.swap_value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::DmaAddr;
    use crate::tests::helpers::FakeRegisters;

    const HEADER: DlChannel = DlChannel { index: 1, mode: AddressingMode::Header };
    const HEADERLESS: DlChannel = DlChannel { index: 0, mode: AddressingMode::Headerless };

    #[test]
    fn test_header_enqueue_writes_header_address() {
        let regs = DlRegisters::new(FakeRegisters::new());
        regs.enqueue(HEADER, HwProgram::Header { header: DmaAddr(0x4000_0800) });

        assert_eq!(regs.io().writes(), [(0x0108, 0x4000_0800)]);
    }

    #[test]
    fn test_headerless_enqueue_sets_update_bit() {
        let regs = DlRegisters::new(FakeRegisters::new());
        regs.enqueue(
            HEADERLESS,
            HwProgram::Headerless { body: DmaAddr(0x4000_0000), size: 24 },
        );

        assert_eq!(
            regs.io().writes(),
            [(0x0104, 0x4000_0000), (0x0120, (1 << 24) | 24)]
        );
    }

    #[test]
    fn test_update_pending_reads_mode_specific_bit() {
        let regs = DlRegisters::new(FakeRegisters::new());

        regs.io().set(0x0004, 1 << 4);
        assert!(regs.update_pending(HEADER));
        assert!(!regs.update_pending(HEADERLESS));

        regs.io().set(0x0004, 0);
        regs.io().set(0x0120, 1 << 24);
        assert!(!regs.update_pending(HEADER));
        assert!(regs.update_pending(HEADERLESS));
    }

    #[test]
    fn test_setup_selects_cycling_mode() {
        let single = DlRegisters::new(FakeRegisters::new());
        single.setup(CyclingMode::SingleShot);
        assert_eq!(single.io().writes(), [(0x0100, 0x0100_1111), (0x0114, 1 << 2)]);

        let continuous = DlRegisters::new(FakeRegisters::new());
        continuous.setup(CyclingMode::Continuous);
        assert_eq!(continuous.io().writes()[0], (0x0100, 0x0100_1117));
    }
}
