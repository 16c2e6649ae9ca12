use anchor_lang::prelude::*;

// PDA Seeds
#[constant]
pub const STATE_SEED: &[u8] = b"state";
#[constant]
pub const POOL_SEED: &[u8] = b"pool";
#[constant]
pub const RESERVE_SEED: &[u8] = b"reserve";
#[constant]
pub const RECEIPT_SEED: &[u8] = b"receipt";

/// Position of the pool account in both the `Borrow` and `Repay` account lists.
/// The guard reads it straight out of raw instructions, so the two structs
/// must keep `pool` in this slot.
pub const LOAN_POOL_ACCOUNT_INDEX: usize = 1;

/// Anchor discriminator (8) + u64 amount (8)
pub const LOAN_INSTRUCTION_DATA_LEN: usize = 16;
