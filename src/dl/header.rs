//! Display list headers.
//!
//! In header mode the device is programmed with the address of a header
//! rather than a body. The header lists every body of the display list
//! and says what to do once they are processed: jump to another header,
//! loop on itself, or stop and raise the frame end interrupt.

use bitflags::bitflags;

use crate::mem::DmaAddr;

/// Bodies a single header can describe: the primary body plus seven
/// fragments.
pub const DL_MAX_BODIES: usize = 8;

/// Bytes reserved for a header after the primary body.
pub const DL_HEADER_SIZE: usize = (core::mem::size_of::<DlHeader>() + 7) & !7;

bitflags! {
    /// Control bits of [`DlHeader::flags`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u32 {
        /// Start the next header without CPU intervention
        const AUTO_START = 1 << 0;
        /// Raise the frame end interrupt when this list completes
        const INT_ENABLE = 1 << 1;
    }
}

/// One body as described in a header.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DlHeaderList {
    /// Size of the body in bytes
    pub num_bytes: u32,
    /// Bus address of the body
    pub addr: u32,
}

/// Display list header, in the layout the device reads.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DlHeader {
    /// Number of bodies minus one
    pub num_lists: u32,
    pub lists: [DlHeaderList; DL_MAX_BODIES],
    /// Bus address of the header to process next
    pub next_header: u32,
    /// Raw [`HeaderFlags`]
    pub flags: u32,
}

const _: () = assert!(core::mem::size_of::<DlHeader>() == 76);

/// Where the device goes after a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeaderLink {
    /// Continue with the next list of a chain.
    Next(DmaAddr),
    /// Reload this same list every frame.
    Loop(DmaAddr),
    /// Stop after this list.
    Stop,
}

impl DlHeader {
    /// Header describing a single empty body at `body0`.
    pub(crate) fn initial(body0: DmaAddr) -> Self {
        let mut header = Self::default();
        header.lists[0].addr = body0.as_u32();
        header
    }

    /// Describe `bodies` in order, each as (address, byte size), and
    /// link to what follows.
    pub(crate) fn describe<I>(bodies: I, link: HeaderLink) -> Self
    where
        I: IntoIterator<Item = (DmaAddr, u32)>,
    {
        let mut header = Self::default();
        let mut count: u32 = 0;

        for (slot, (addr, num_bytes)) in header.lists.iter_mut().zip(bodies) {
            *slot = DlHeaderList { num_bytes, addr: addr.as_u32() };
            count += 1;
        }

        header.num_lists = count.saturating_sub(1);

        let flags = match link {
            HeaderLink::Next(next) => {
                header.next_header = next.as_u32();
                HeaderFlags::AUTO_START
            }
            HeaderLink::Loop(this) => {
                header.next_header = this.as_u32();
                HeaderFlags::INT_ENABLE | HeaderFlags::AUTO_START
            }
            HeaderLink::Stop => HeaderFlags::INT_ENABLE,
        };
        header.flags = flags.bits();

        header
    }

    /// Decoded control flags.
    pub fn header_flags(&self) -> HeaderFlags {
        HeaderFlags::from_bits_retain(self.flags)
    }

    /// The bodies this header describes.
    pub fn bodies(&self) -> &[DlHeaderList] {
        let count = (self.num_lists as usize + 1).min(DL_MAX_BODIES);
        &self.lists[..count]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size_is_aligned() {
        assert_eq!(DL_HEADER_SIZE, 80);
    }

    #[test]
    fn test_describe_orders_bodies() {
        let header = DlHeader::describe(
            [(DmaAddr(0x1000), 24), (DmaAddr(0x2000), 8), (DmaAddr(0x3000), 16)],
            HeaderLink::Stop,
        );

        assert_eq!(header.num_lists, 2);
        assert_eq!(
            header.bodies(),
            [
                DlHeaderList { num_bytes: 24, addr: 0x1000 },
                DlHeaderList { num_bytes: 8, addr: 0x2000 },
                DlHeaderList { num_bytes: 16, addr: 0x3000 },
            ]
        );
        assert_eq!(header.header_flags(), HeaderFlags::INT_ENABLE);
        assert_eq!(header.next_header, 0);
    }

    #[test]
    fn test_links() {
        let next = DlHeader::describe([(DmaAddr(0x1000), 0)], HeaderLink::Next(DmaAddr(0x5800)));
        assert_eq!(next.header_flags(), HeaderFlags::AUTO_START);
        assert_eq!(next.next_header, 0x5800);

        let looped = DlHeader::describe([(DmaAddr(0x1000), 0)], HeaderLink::Loop(DmaAddr(0x1800)));
        assert_eq!(looped.header_flags(), HeaderFlags::AUTO_START | HeaderFlags::INT_ENABLE);
        assert_eq!(looped.next_header, 0x1800);
    }

    #[test]
    fn test_initial_header_points_at_body() {
        let header = DlHeader::initial(DmaAddr(0x4000_0000));
        assert_eq!(header.lists[0].addr, 0x4000_0000);
        assert_eq!(header.bodies().len(), 1);
    }
}
