//! Push-forward: the forward image of a range (or pair of ranges) under an
//! operator. Unlike pull-back, push-forward never fails — non-linear or
//! unknown operators simply yield the full output range.

use super::overlap::gcd;
use super::CircleRange;
use crate::opcode::Opcode;

pub(super) fn push_forward_unary(opc: Opcode, input: &CircleRange, in_size: u32, out_size: u32) -> CircleRange {
    let out_mask = CircleRange::mask_of_size_bits(out_size * 8);
    if input.is_empty() {
        return CircleRange::empty(out_mask);
    }
    match opc {
        Opcode::Copy | Opcode::IntSext | Opcode::IntZext if out_size >= in_size => widen_mask(input, out_mask),
        Opcode::IntNegate | Opcode::IntNot if input.is_full() => CircleRange::full(out_mask),
        Opcode::IntNegate => negate_forward(input, out_mask),
        Opcode::IntNot => not_forward(input, out_mask),
        _ => CircleRange::full(out_mask),
    }
}

/// Push-forward through a binary operator. `max_step` bounds how far the
/// result's stride may be widened when the exact stride would otherwise
/// overflow the representable range.
pub fn push_forward_binary(
    opc: Opcode,
    in1: &CircleRange,
    in2: &CircleRange,
    in_size: u32,
    out_size: u32,
    max_step: u64,
) -> CircleRange {
    let out_mask = CircleRange::mask_of_size_bits(out_size * 8);
    let _ = in_size;
    if in1.is_empty() || in2.is_empty() {
        return CircleRange::empty(out_mask);
    }
    if in1.is_full() || in2.is_full() {
        return CircleRange::full(out_mask);
    }

    match opc {
        Opcode::IntAdd => additive(in1, in2, out_mask, false),
        Opcode::IntSub => additive(in1, in2, out_mask, true),
        Opcode::IntMult => multiplicative(in1, in2, out_mask, max_step),
        Opcode::IntAnd => bitwise_nz_mask(in1, in2, out_mask, |a, b| a & b),
        Opcode::IntOr => bitwise_nz_mask(in1, in2, out_mask, |a, b| a | b),
        Opcode::IntXor => bitwise_nz_mask(in1, in2, out_mask, |a, b| a | b),
        Opcode::IntEqual | Opcode::IntLess { .. } | Opcode::IntLessEqual { .. } => CircleRange::full(out_mask),
        _ => CircleRange::full(out_mask),
    }
}

fn widen_mask(r: &CircleRange, new_mask: u64) -> CircleRange {
    if r.is_full() {
        return CircleRange::full(new_mask);
    }
    CircleRange::new_checked(r.get_min().unwrap_or(0), r.get_end(), new_mask, r.step())
        .unwrap_or_else(|| CircleRange::full(new_mask))
}

fn negate_forward(r: &CircleRange, mask: u64) -> CircleRange {
    let last = r.get_max().unwrap();
    let left = 0u64.wrapping_sub(last) & mask;
    let right = (0u64.wrapping_sub(r.get_min().unwrap()).wrapping_add(r.step())) & mask;
    CircleRange::new_unchecked(left, right, mask, r.step())
}

fn not_forward(r: &CircleRange, mask: u64) -> CircleRange {
    let last = r.get_max().unwrap();
    let left = mask.wrapping_sub(last) & mask;
    let right = (mask.wrapping_sub(r.get_min().unwrap()).wrapping_add(r.step())) & mask;
    CircleRange::new_unchecked(left, right, mask, r.step())
}

fn additive(a: &CircleRange, b: &CircleRange, mask: u64, negate_b: bool) -> CircleRange {
    let step = gcd(a.step(), b.step());
    let left_b = if negate_b { 0u64.wrapping_sub(b.get_min().unwrap()) } else { b.get_min().unwrap() };
    let left = a.get_min().unwrap().wrapping_add(left_b) & mask;
    let span = (a.get_size() + b.get_size() - 1).min(mask as u128 + 1);
    let right = left.wrapping_add((span * step as u128) as u64) & mask;
    CircleRange::new_checked(left, right, mask, step).unwrap_or_else(|| CircleRange::full(mask))
}

fn multiplicative(a: &CircleRange, b: &CircleRange, mask: u64, max_step: u64) -> CircleRange {
    // Only representable exactly when one side is a singleton; otherwise
    // widen stride up to `max_step` and approximate the span.
    if let Some(c) = a.get_min().filter(|_| a.get_size() == 1) {
        return scale_range(b, mask, c, max_step);
    }
    if let Some(c) = b.get_min().filter(|_| b.get_size() == 1) {
        return scale_range(a, mask, c, max_step);
    }
    CircleRange::full(mask)
}

fn scale_range(r: &CircleRange, mask: u64, factor: u64, max_step: u64) -> CircleRange {
    let left = r.get_min().unwrap().wrapping_mul(factor) & mask;
    let last = r.get_max().unwrap().wrapping_mul(factor) & mask;
    let raw_step = r.step().wrapping_mul(factor);
    let step = raw_step.next_power_of_two().clamp(1, max_step.max(1));
    let right = last.wrapping_add(step) & mask;
    CircleRange::new_checked(left, right, mask, step).unwrap_or_else(|| CircleRange::full(mask))
}

fn bitwise_nz_mask(a: &CircleRange, b: &CircleRange, mask: u64, combine: impl Fn(u64, u64) -> u64) -> CircleRange {
    let a_nz = a.get_max().unwrap_or(mask);
    let b_nz = b.get_max().unwrap_or(mask);
    CircleRange::set_nz_mask(combine(a_nz, b_nz) & mask, mask)
}
