/// Change detection over retained frame buffers.
///
/// The protocol keeps two memo buffers — one for the last-sent frame, one
/// for the last-decoded incoming frame — purely to suppress redundant work:
/// a tag roll and diagnostic report on transmit, a diagnostic echo on
/// receive. The buffers have no semantics beyond memoization.

/// Compare `new` against `reference` byte by byte, copying every differing
/// byte into `reference` in the same pass. Returns true only if every
/// position already matched.
///
/// Copy-on-difference is per position: when the result is false,
/// `reference` may have been partially rewritten before the first
/// mismatch was found. Callers only get a guarantee about the final
/// state — `reference == new` after every call.
pub fn diff_and_copy(new: &[u8], reference: &mut [u8]) -> bool {
    debug_assert_eq!(new.len(), reference.len());
    let mut identical = true;
    for (n, r) in new.iter().zip(reference.iter_mut()) {
        if *n != *r {
            identical = false;
            *r = *n;
        }
    }
    identical
}
