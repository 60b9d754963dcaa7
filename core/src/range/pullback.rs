//! Pull-back: given an output range and an operator, the set of inputs
//! consistent with producing something in that range.

use thiserror::Error;

use super::CircleRange;
use crate::opcode::Opcode;

/// Why a pull-back could not produce a tightened input range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PullBackError {
    /// The operator has no known inverse (e.g. it is lossy or
    /// non-injective); the input is left unconstrained.
    #[error("opcode has no known inverse")]
    NotInvertible,
    /// The operator is invertible in general but this particular output
    /// range has no representable pre-image (e.g. a phase that does not
    /// align to the required stride).
    #[error("no representable pre-image for this output range")]
    NoRepresentation,
}

pub(super) fn pull_back_unary(
    out: &CircleRange,
    opc: Opcode,
    in_size: u32,
    out_size: u32,
) -> Result<CircleRange, PullBackError> {
    let in_mask = CircleRange::mask_of_size_bits(in_size * 8);
    let out_mask = CircleRange::mask_of_size_bits(out_size * 8);
    debug_assert_eq!(out.mask(), out_mask);

    match opc {
        Opcode::Copy => Ok(rebase_mask(out, in_mask)),
        Opcode::IntNegate => {
            // y = -x mod 2^n  <=>  x = -y mod 2^n; negation is its own
            // inverse over a power-of-two modulus.
            Ok(negate(out, in_mask))
        },
        Opcode::IntNot => {
            // y = ~x  <=>  x = ~y.
            Ok(bitwise_not(out, in_mask))
        },
        Opcode::IntZext if out_size >= in_size => {
            // Pre-image is whatever part of `out` fits in the narrower
            // input modulus; values with any high bit set outside the
            // input's width have no pre-image and are dropped.
            let representable = CircleRange::new_checked(0, in_mask.wrapping_add(1) & out_mask, out_mask, 1)
                .unwrap_or_else(|| CircleRange::full(out_mask));
            let (_, clipped) = out.intersect(&representable);
            Ok(rebase_mask(&clipped, in_mask))
        },
        Opcode::IntSext if out_size >= in_size => {
            // A sign-extended value's low `in_size` bytes equal the input
            // exactly; reinterpret `out` modulo the narrower width.
            Ok(rebase_mask(out, in_mask))
        },
        Opcode::IntSubPiece if in_size >= out_size => {
            // Truncation: any input whose low bytes fall in `out` qualifies,
            // so the pre-image modulo the wider input width is unconstrained
            // above the truncated bits. Conservatively widen to full since a
            // single circular range over the wider modulus cannot represent
            // "low bits constrained, high bits free" in general.
            let _ = out;
            Ok(CircleRange::full(in_mask))
        },
        _ => Err(PullBackError::NotInvertible),
    }
}

pub(super) fn pull_back_binary(
    out: &CircleRange,
    opc: Opcode,
    const_val: u64,
    slot: usize,
    in_size: u32,
    out_size: u32,
) -> Result<CircleRange, PullBackError> {
    let in_mask = CircleRange::mask_of_size_bits(in_size * 8);
    let out_mask = CircleRange::mask_of_size_bits(out_size * 8);
    debug_assert_eq!(out.mask(), out_mask);
    let c = const_val & in_mask;

    match opc {
        Opcode::IntAdd => {
            // y = x + c  <=>  x = y - c.
            Ok(shift(out, in_mask, c, true))
        },
        Opcode::IntSub if slot == 1 => {
            // y = x - c  <=>  x = y + c.
            Ok(shift(out, in_mask, c, false))
        },
        Opcode::IntSub if slot == 0 => {
            // y = c - x  <=>  x = c - y, same as negating then shifting.
            let negated = negate(out, in_mask);
            Ok(shift(&negated, in_mask, c, false))
        },
        Opcode::IntMult if c != 0 && c & 1 == 1 => {
            // Multiplication by an odd constant is a bijection mod 2^n;
            // solve via its modular inverse.
            let inv = mod_inverse_odd(c, in_size * 8);
            Ok(scale(out, in_mask, inv))
        },
        Opcode::IntShl if slot == 1 => {
            let shift_amt = c & 63;
            if shift_amt == 0 {
                return Ok(rebase_mask(out, in_mask));
            }
            if shift_amt >= (in_size * 8) as u64 {
                return if out.contains(0) {
                    Ok(CircleRange::full(in_mask))
                } else {
                    Err(PullBackError::NoRepresentation)
                };
            }
            // y = x << s  =>  the low s bits of y must be zero, and x's
            // candidate low bits become free; expand the stride.
            let new_step = (out.step() << shift_amt).min(in_mask.wrapping_add(1));
            let left = out.get_min().unwrap_or(0) >> shift_amt;
            let right = (out.get_end() >> shift_amt) & in_mask;
            CircleRange::new_checked(left, right, in_mask, new_step.max(1)).ok_or(PullBackError::NoRepresentation)
        },
        Opcode::IntShr if slot == 1 => {
            let shift_amt = c & 63;
            if shift_amt == 0 {
                return Ok(rebase_mask(out, in_mask));
            }
            // y = x >> s (logical): x's low s bits are unconstrained, the
            // remaining bits must land in `out` once shifted back up.
            let left = out.get_min().unwrap_or(0) << shift_amt;
            let width_mask = in_mask >> shift_amt;
            if width_mask == 0 {
                return Err(PullBackError::NoRepresentation);
            }
            let span = out.get_size().min(width_mask as u128 + 1);
            let right = left.wrapping_add((span << shift_amt) as u64) & in_mask;
            CircleRange::new_checked(left & in_mask, right, in_mask, 1).ok_or(PullBackError::NoRepresentation)
        },
        Opcode::IntAnd if slot == 1 || slot == 0 => {
            // y = x & c: x's bits outside c's mask are free, bits inside
            // c's mask must equal the corresponding bits of y. Representable
            // only when `out` is a non-zero-mask-style range; approximate
            // via setNZMask on the constant's complement-free bits.
            if out.contains(0) {
                Ok(CircleRange::full(in_mask))
            } else {
                Ok(CircleRange::set_nz_mask(c, in_mask))
            }
        },
        Opcode::IntOr if slot == 1 || slot == 0 => {
            // y = x | c: bits set in c are always set in y regardless of x,
            // so they carry no information about x; over-approximate with
            // full unless `out` already excludes values incompatible with c.
            Ok(CircleRange::full(in_mask))
        },
        Opcode::IntEqual => boolean_preimage(out, in_mask, c, true),
        // slot is the position of the *known constant*; the unconstrained
        // variable sits at the other position. slot==0 means the operation
        // reads `c OP x` (the variable is the right-hand operand), slot==1
        // means `x OP c` (the variable is the left-hand operand).
        Opcode::IntLess { signed: false } if slot == 0 => half_plane(out, in_mask, c, Half::Above),
        Opcode::IntLess { signed: false } if slot == 1 => half_plane(out, in_mask, c, Half::Below),
        Opcode::IntLessEqual { signed: false } if slot == 0 => half_plane(out, in_mask, c, Half::AboveInclusive),
        Opcode::IntLessEqual { signed: false } if slot == 1 => half_plane(out, in_mask, c, Half::BelowInclusive),
        Opcode::IntLess { signed: true } if slot == 0 => signed_half_plane(out, in_mask, c, Half::Above),
        Opcode::IntLess { signed: true } if slot == 1 => signed_half_plane(out, in_mask, c, Half::Below),
        Opcode::IntLessEqual { signed: true } if slot == 0 => {
            signed_half_plane(out, in_mask, c, Half::AboveInclusive)
        },
        Opcode::IntLessEqual { signed: true } if slot == 1 => {
            signed_half_plane(out, in_mask, c, Half::BelowInclusive)
        },
        _ => Err(PullBackError::NotInvertible),
    }
}

fn rebase_mask(r: &CircleRange, new_mask: u64) -> CircleRange {
    if r.is_empty() {
        return CircleRange::empty(new_mask);
    }
    let left = r.get_min().unwrap_or(0) & new_mask;
    if r.is_full() {
        return CircleRange::full(new_mask);
    }
    let right = r.get_end() & new_mask;
    CircleRange::new_checked(left, right, new_mask, r.step().min(new_mask.wrapping_add(1)).max(1))
        .unwrap_or_else(|| CircleRange::full(new_mask))
}

fn negate(r: &CircleRange, mask: u64) -> CircleRange {
    if r.is_empty() {
        return CircleRange::empty(mask);
    }
    if r.is_full() {
        return CircleRange::full(mask);
    }
    // -[l, r) = (-r, -l] circularly = [1-r, 1-l) after reversing orientation,
    // i.e. new_left = -(r-step) = -(last element), new_right = -(l) + step.
    let last = r.get_max().unwrap_or(r.get_min().unwrap());
    let new_left = 0u64.wrapping_sub(last) & mask;
    let new_right = (0u64.wrapping_sub(r.get_min().unwrap()).wrapping_add(r.step())) & mask;
    CircleRange::new_unchecked(new_left, new_right, mask, r.step())
}

fn bitwise_not(r: &CircleRange, mask: u64) -> CircleRange {
    if r.is_empty() {
        return CircleRange::empty(mask);
    }
    if r.is_full() {
        return CircleRange::full(mask);
    }
    // ~x = mask - x, which reverses order and orientation the same way
    // negation by one less does; reuse the same construction as `negate`
    // shifted by one.
    let last = r.get_max().unwrap_or(r.get_min().unwrap());
    let new_left = mask.wrapping_sub(last) & mask;
    let new_right = (mask.wrapping_sub(r.get_min().unwrap()).wrapping_add(r.step())) & mask;
    CircleRange::new_unchecked(new_left, new_right, mask, r.step())
}

fn shift(r: &CircleRange, mask: u64, c: u64, subtract: bool) -> CircleRange {
    if r.is_empty() {
        return CircleRange::empty(mask);
    }
    if r.is_full() {
        return CircleRange::full(mask);
    }
    let delta = if subtract { 0u64.wrapping_sub(c) } else { c };
    let left = r.get_min().unwrap().wrapping_add(delta) & mask;
    let right = r.get_end().wrapping_add(delta) & mask;
    CircleRange::new_unchecked(left, right, mask, r.step())
}

fn scale(r: &CircleRange, mask: u64, factor: u64) -> CircleRange {
    if r.is_empty() {
        return CircleRange::empty(mask);
    }
    if r.is_full() {
        return CircleRange::full(mask);
    }
    let left = r.get_min().unwrap().wrapping_mul(factor) & mask;
    let last = r.get_max().unwrap().wrapping_mul(factor) & mask;
    let raw_step = r.step().wrapping_mul(factor) & mask;
    let step = if raw_step == 0 { mask.wrapping_add(1).max(1) } else { raw_step.next_power_of_two() }
        .min(mask.wrapping_add(1));
    let right = last.wrapping_add(step) & mask;
    CircleRange::new_checked(left, right, mask, step).unwrap_or_else(|| CircleRange::full(mask))
}

/// Modular inverse of an odd `c` modulo `2^bits`, via Newton's iteration for
/// the 2-adic inverse (doubles the number of correct bits each step).
fn mod_inverse_odd(c: u64, bits: u32) -> u64 {
    let mask = CircleRange::mask_of_size_bits(bits);
    let mut x = c; // correct to 3 bits for any odd c
    for _ in 0..6 {
        x = x.wrapping_mul(2u64.wrapping_sub(c.wrapping_mul(x))) & mask;
    }
    x & mask
}

enum Half {
    Below,
    BelowInclusive,
    Above,
    AboveInclusive,
}

fn half_plane(out: &CircleRange, mask: u64, c: u64, which: Half) -> Result<CircleRange, PullBackError> {
    let true_only = out.contains(1) && !out.contains(0);
    let false_only = out.contains(0) && !out.contains(1);
    if !true_only && !false_only {
        return Ok(CircleRange::full(mask));
    }
    let want_true = true_only;
    let range = match (which, want_true) {
        (Half::Below, true) => CircleRange::new_checked(0, c, mask, 1),
        (Half::Below, false) => CircleRange::new_checked(c, 0, mask, 1),
        (Half::BelowInclusive, true) => CircleRange::new_checked(0, c.wrapping_add(1) & mask, mask, 1),
        (Half::BelowInclusive, false) => CircleRange::new_checked(c.wrapping_add(1) & mask, 0, mask, 1),
        (Half::Above, true) => CircleRange::new_checked(c.wrapping_add(1) & mask, 0, mask, 1),
        (Half::Above, false) => CircleRange::new_checked(0, c.wrapping_add(1) & mask, mask, 1),
        (Half::AboveInclusive, true) => CircleRange::new_checked(c, 0, mask, 1),
        (Half::AboveInclusive, false) => CircleRange::new_checked(0, c, mask, 1),
    };
    range.ok_or(PullBackError::NoRepresentation)
}

/// The bias (`2^(n-1)`) that maps signed ordering onto unsigned ordering:
/// flipping a value's sign bit is equivalent to adding this bias modulo
/// `2^n`, so `x <s c  <=>  (x + bias) <u (c + bias)` (both taken mod `2^n`).
/// This lets signed comparisons reuse [`half_plane`] by biasing the constant
/// before the lookup and unbiasing the resulting range afterward — `shift`
/// by `bias` is its own inverse here, since `bias + bias == 2^n ≡ 0`.
fn sign_bias(mask: u64) -> u64 {
    (((mask as u128 + 1) / 2) as u64).max(1)
}

/// Pre-image for a signed `<`/`<=` comparison against a constant, via the
/// same boundary derivation [`half_plane`] uses for the unsigned form.
fn signed_half_plane(out: &CircleRange, mask: u64, c: u64, which: Half) -> Result<CircleRange, PullBackError> {
    let bias = sign_bias(mask);
    let c_biased = c.wrapping_add(bias) & mask;
    let pre_biased = half_plane(out, mask, c_biased, which)?;
    Ok(shift(&pre_biased, mask, bias, false))
}

fn boolean_preimage(out: &CircleRange, mask: u64, c: u64, _eq: bool) -> Result<CircleRange, PullBackError> {
    let true_only = out.contains(1) && !out.contains(0);
    let false_only = out.contains(0) && !out.contains(1);
    if true_only {
        Ok(CircleRange::single(c, mask))
    } else if false_only {
        Ok(CircleRange::single(c, mask).complement())
    } else {
        Ok(CircleRange::full(mask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const M32: u64 = u32::MAX as u64;

    #[test]
    fn x_less_than_constant_true_edge_is_below() {
        // "x < 10": the constant occupies slot 1 (x OP c), so the true edge
        // (out = {1}) must pull back to [0, 10).
        let true_out = CircleRange::single(1, 1);
        let r = pull_back_binary(&true_out, Opcode::IntLess { signed: false }, 10, 1, 4, 1).unwrap();
        assert!(r.contains(0));
        assert!(r.contains(9));
        assert!(!r.contains(10));
    }

    #[test]
    fn x_less_than_constant_false_edge_is_above_or_equal() {
        let false_out = CircleRange::single(0, 1);
        let r = pull_back_binary(&false_out, Opcode::IntLess { signed: false }, 10, 1, 4, 1).unwrap();
        assert!(r.contains(10));
        assert!(!r.contains(9));
    }

    #[test]
    fn constant_less_than_x_true_edge_is_above() {
        // "10 < x": the constant occupies slot 0 (c OP x), so the true edge
        // must pull back to (10, MAX].
        let true_out = CircleRange::single(1, 1);
        let r = pull_back_binary(&true_out, Opcode::IntLess { signed: false }, 10, 0, 4, 1).unwrap();
        assert!(r.contains(11));
        assert!(!r.contains(10));
    }

    #[test]
    fn signed_less_than_constant_true_edge_wraps_through_negative() {
        // "x <s 10" (4 bytes): true covers every negative value (top bit
        // set, i.e. unsigned >= 2^31) plus [0, 10) — not representable as a
        // plain [0, 10) the way the unsigned form is.
        let true_out = CircleRange::single(1, 1);
        let r = pull_back_binary(&true_out, Opcode::IntLess { signed: true }, 10, 1, 4, 1).unwrap();
        assert!(r.contains(0));
        assert!(r.contains(9));
        assert!(!r.contains(10));
        assert!(r.contains(0x8000_0000)); // INT_MIN: very negative, certainly < 10.
        assert!(!r.contains(0x7FFF_FFFF)); // INT_MAX: positive, not < 10.
    }

    #[test]
    fn signed_less_than_constant_false_edge_is_the_complementary_half() {
        let false_out = CircleRange::single(0, 1);
        let r = pull_back_binary(&false_out, Opcode::IntLess { signed: true }, 10, 1, 4, 1).unwrap();
        assert!(r.contains(10));
        assert!(r.contains(0x7FFF_FFFF)); // INT_MAX, not < 10.
        assert!(!r.contains(0x8000_0000)); // INT_MIN, is < 10.
        assert!(!r.contains(9));
    }

    #[test]
    fn signed_less_than_negative_constant_excludes_most_negatives() {
        // "x <s -5" (4 bytes): true edge is everything strictly below -5,
        // i.e. [INT_MIN, -5) in signed terms.
        let neg_five = (-5i32) as u32 as u64;
        let true_out = CircleRange::single(1, 1);
        let r = pull_back_binary(&true_out, Opcode::IntLess { signed: true }, neg_five, 1, 4, 1).unwrap();
        assert!(r.contains(0x8000_0000)); // INT_MIN
        assert!(r.contains(neg_five - 1));
        assert!(!r.contains(neg_five));
        assert!(!r.contains(0));
    }

    #[test]
    fn constant_signed_less_than_x_true_edge_is_above() {
        // "10 <s x": constant occupies slot 0, true edge is everything
        // strictly greater than 10 in signed order, up to INT_MAX.
        let true_out = CircleRange::single(1, 1);
        let r = pull_back_binary(&true_out, Opcode::IntLess { signed: true }, 10, 0, 4, 1).unwrap();
        assert!(r.contains(11));
        assert!(!r.contains(10));
        assert!(!r.contains(0x8000_0000)); // INT_MIN is not > 10.
        assert!(r.contains(0x7FFF_FFFF)); // INT_MAX is > 10.
    }

    #[test]
    fn negate_is_self_inverse() {
        let out = CircleRange::new_checked(5, 10, M32, 1).unwrap();
        let pre = pull_back_unary(&out, Opcode::IntNegate, 4, 4).unwrap();
        let back = negate(&pre, M32);
        assert_eq!(back, out);
    }

    #[test]
    fn add_constant_shifts_range() {
        // y = x + 5, y in [10, 20) => x in [5, 15).
        let out = CircleRange::new_checked(10, 20, M32, 1).unwrap();
        let r = pull_back_binary(&out, Opcode::IntAdd, 5, 1, 4, 4).unwrap();
        assert_eq!(r, CircleRange::new_checked(5, 15, M32, 1).unwrap());
    }
}
