/// Returns 8 random lowercase hex digits.
///
/// Used for broker client id suffixes and command correlation ids, where
/// uniqueness matters but unpredictability does not.
///
/// # Examples
///
/// ```
/// use airplus::util::hex_id;
///
/// let id = hex_id();
/// assert_eq!(id.len(), 8);
/// ```
#[must_use]
pub fn hex_id() -> String {
    format!("{:08x}", fastrand::u32(..))
}
