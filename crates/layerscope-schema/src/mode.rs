//! POSIX `st_mode` format and permission bits.
//!
//! Values follow the Linux `<sys/stat.h>` layout regardless of host platform,
//! since layer archives always carry Linux modes.

pub const S_IFMT: u32 = 0o170_000;
pub const S_IFSOCK: u32 = 0o140_000;
pub const S_IFLNK: u32 = 0o120_000;
pub const S_IFREG: u32 = 0o100_000;
pub const S_IFBLK: u32 = 0o060_000;
pub const S_IFDIR: u32 = 0o040_000;
pub const S_IFCHR: u32 = 0o020_000;
pub const S_IFIFO: u32 = 0o010_000;

/// Permission, setuid/setgid and sticky bits.
pub const PERMISSION_BITS: u32 = 0o7777;

#[inline]
pub fn format_bits(mode: u32) -> u32 {
    mode & S_IFMT
}

/// `ls -l` style rendering, e.g. `drwxr-xr-x`.
pub fn render(mode: u32) -> String {
    let kind = match format_bits(mode) {
        S_IFDIR => 'd',
        S_IFLNK => 'l',
        S_IFCHR => 'c',
        S_IFBLK => 'b',
        S_IFIFO => 'p',
        S_IFSOCK => 's',
        0 | S_IFREG => '-',
        _ => '?',
    };
    let mut out = String::with_capacity(10);
    out.push(kind);
    let specials = [(0o4000, 's', 'S'), (0o2000, 's', 'S'), (0o1000, 't', 'T')];
    for (shift, (special_bit, on, off)) in [6u32, 3, 0].into_iter().zip(specials) {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        let exec = bits & 0o1 != 0;
        out.push(match (mode & special_bit != 0, exec) {
            (true, true) => on,
            (true, false) => off,
            (false, true) => 'x',
            (false, false) => '-',
        });
    }
    out
}
