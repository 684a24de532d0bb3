/// One mulberry32 step: advances `state` and returns the next 32-bit output.
pub fn next_random_u32(state: &mut u32) -> u32 {
    let mut next = state.wrapping_add(0x6d2b79f5);
    *state = next;
    next = (next ^ (next >> 15)).wrapping_mul(next | 1);
    next ^= next.wrapping_add((next ^ (next >> 7)).wrapping_mul(next | 61));
    next ^ (next >> 14)
}
