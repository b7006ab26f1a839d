mod sealed {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for i8 {}
}

/// Element type of a native byte buffer.
///
/// C headers distinguish `char *` and `uint8_t *` buffers even when both come
/// from the same heap. Only the two single-byte views are allowed, so any bit
/// pattern is a valid element and a region can switch views in place.
pub trait Element: sealed::Sealed + Copy + Send + Sync + 'static {
    /// View name for logs.
    const VIEW: &'static str;
}

/// Unsigned view (`uint8_t *`).
impl Element for u8 {
    const VIEW: &'static str = "unsigned";
}

/// Signed view (`char *` on platforms where it is signed).
impl Element for i8 {
    const VIEW: &'static str = "signed";
}
