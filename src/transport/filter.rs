//! Classic BPF programs attached with `SO_ATTACH_FILTER`.
//!
//! Both programs were compiled with `tcpdump -dd` and are kept as instruction
//! tables; each accepts up to 256 KiB of a matching frame and drops the rest.

/// One classic BPF instruction, laid out like `struct sock_filter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BpfInstruction {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

const fn ins(code: u16, jt: u8, jf: u8, k: u32) -> BpfInstruction {
    BpfInstruction { code, jt, jf, k }
}

/// `arp or port 67 or port 68` over IPv4 and IPv6 (UDP, TCP, SCTP).
pub const DHCPV4_FILTER: &[BpfInstruction] = &[
    ins(0x28, 0, 0, 0x0000000c),
    ins(0x15, 24, 0, 0x00000806),
    ins(0x15, 0, 9, 0x000086dd),
    ins(0x30, 0, 0, 0x00000014),
    ins(0x15, 2, 0, 0x00000084),
    ins(0x15, 1, 0, 0x00000006),
    ins(0x15, 0, 20, 0x00000011),
    ins(0x28, 0, 0, 0x00000036),
    ins(0x15, 17, 0, 0x00000043),
    ins(0x15, 16, 0, 0x00000044),
    ins(0x28, 0, 0, 0x00000038),
    ins(0x15, 14, 13, 0x00000043),
    ins(0x15, 0, 14, 0x00000800),
    ins(0x30, 0, 0, 0x00000017),
    ins(0x15, 2, 0, 0x00000084),
    ins(0x15, 1, 0, 0x00000006),
    ins(0x15, 0, 10, 0x00000011),
    ins(0x28, 0, 0, 0x00000014),
    ins(0x45, 8, 0, 0x00001fff),
    ins(0xb1, 0, 0, 0x0000000e),
    ins(0x48, 0, 0, 0x0000000e),
    ins(0x15, 4, 0, 0x00000043),
    ins(0x15, 3, 0, 0x00000044),
    ins(0x48, 0, 0, 0x00000010),
    ins(0x15, 1, 0, 0x00000043),
    ins(0x15, 0, 1, 0x00000044),
    ins(0x06, 0, 0, 0x00040000),
    ins(0x06, 0, 0, 0x00000000),
];

/// `tcp` over IPv4 and IPv6 (including one IPv6 fragment header hop).
pub const TCP_FILTER: &[BpfInstruction] = &[
    ins(0x28, 0, 0, 0x0000000c),
    ins(0x15, 0, 5, 0x000086dd),
    ins(0x30, 0, 0, 0x00000014),
    ins(0x15, 6, 0, 0x00000006),
    ins(0x15, 0, 6, 0x0000002c),
    ins(0x30, 0, 0, 0x00000036),
    ins(0x15, 3, 4, 0x00000006),
    ins(0x15, 0, 3, 0x00000800),
    ins(0x30, 0, 0, 0x00000017),
    ins(0x15, 0, 1, 0x00000006),
    ins(0x06, 0, 0, 0x00040000),
    ins(0x06, 0, 0, 0x00000000),
];

/// Convert to the kernel's `sock_filter` layout.
pub fn to_sock_filters(program: &[BpfInstruction]) -> Vec<libc::sock_filter> {
    program
        .iter()
        .map(|i| libc::sock_filter {
            code: i.code,
            jt: i.jt,
            jf: i.jf,
            k: i.k,
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const BPF_RET: u16 = 0x06;

    /// Every jump must land inside the program and the last instruction must
    /// be a return, or the kernel rejects the filter with EINVAL.
    fn assert_well_formed(program: &[BpfInstruction]) {
        let last = program.last().expect("program not empty");
        assert_eq!(last.code, BPF_RET, "program must end with a return");
        for (pc, i) in program.iter().enumerate() {
            if i.code & 0x07 == 0x05 && i.code != 0x05 {
                // conditional jump
                assert!(pc + 1 + (i.jt as usize) < program.len(), "jt out of range at {pc}");
                assert!(pc + 1 + (i.jf as usize) < program.len(), "jf out of range at {pc}");
            }
        }
    }

    #[test]
    fn test_dhcpv4_filter_shape() {
        assert_eq!(DHCPV4_FILTER.len(), 28);
        assert_well_formed(DHCPV4_FILTER);
        assert_eq!(DHCPV4_FILTER[1].k, 0x0806, "ARP is accepted first");
    }

    #[test]
    fn test_tcp_filter_shape() {
        assert_eq!(TCP_FILTER.len(), 12);
        assert_well_formed(TCP_FILTER);
    }

    #[test]
    fn test_to_sock_filters_preserves_fields() {
        let converted = to_sock_filters(TCP_FILTER);
        assert_eq!(converted.len(), TCP_FILTER.len());
        assert_eq!(converted[1].code, 0x15);
        assert_eq!(converted[1].jf, 5);
        assert_eq!(converted[1].k, 0x86dd);
    }
}
