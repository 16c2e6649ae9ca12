//! Transaction introspection for flash loans.
//!
//! `borrow` hands out reserve funds with no collateral. It is only safe because
//! the guard can prove, from the shape of the running transaction, that a
//! matching `repay` will execute later at top level. Everything here is pure
//! over a `CallContext` and a `BatchEntry` slice; the on-chain loaders at the
//! bottom turn the instructions sysvar into those values.

use anchor_lang::prelude::*;
use anchor_lang::solana_program::instruction::{get_stack_height, TRANSACTION_LEVEL_STACK_HEIGHT};
use anchor_lang::solana_program::sysvar::instructions::{
    load_current_index_checked, load_instruction_at_checked,
};
use anchor_lang::Discriminator;

use crate::constants::{LOAN_INSTRUCTION_DATA_LEN, LOAN_POOL_ACCOUNT_INDEX};
use crate::instruction as ix;
use crate::state::{Pool, VaultError};

/// Where the executing instruction sits in the transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallContext {
    /// 0 for a top-level instruction, >0 when invoked through CPI.
    pub depth: u32,
    /// Index of the enclosing top-level instruction.
    pub position: usize,
}

impl CallContext {
    pub fn top_level(position: usize) -> Self {
        Self { depth: 0, position }
    }

    pub fn nested(position: usize, depth: u32) -> Self {
        Self { depth, position }
    }

    pub fn is_top_level(&self) -> bool {
        self.depth == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoanInstruction {
    Borrow,
    Repay,
}

/// A borrow or repay of this program, decoded from raw instruction bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoanCall {
    pub kind: LoanInstruction,
    pub pool: Pubkey,
    pub amount: u64,
}

impl LoanCall {
    pub fn decode(program_id: &Pubkey, accounts: &[Pubkey], data: &[u8]) -> Option<Self> {
        if *program_id != crate::ID || data.len() < LOAN_INSTRUCTION_DATA_LEN {
            return None;
        }

        let (discriminator, rest) = data.split_at(8);
        let kind = if discriminator == ix::Borrow::DISCRIMINATOR {
            LoanInstruction::Borrow
        } else if discriminator == ix::Repay::DISCRIMINATOR {
            LoanInstruction::Repay
        } else {
            return None;
        };

        let amount = u64::from_le_bytes(rest[..8].try_into().ok()?);
        let pool = *accounts.get(LOAN_POOL_ACCOUNT_INDEX)?;

        Some(Self { kind, pool, amount })
    }

    fn is(&self, kind: LoanInstruction, pool: &Pubkey) -> bool {
        self.kind == kind && self.pool == *pool
    }
}

/// One top-level instruction of the running transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchEntry {
    pub program_id: Pubkey,
    pub call: Option<LoanCall>,
}

impl BatchEntry {
    pub fn new(program_id: Pubkey, accounts: &[Pubkey], data: &[u8]) -> Self {
        Self {
            call: LoanCall::decode(&program_id, accounts, data),
            program_id,
        }
    }
}

/// First top-level repay on `pool` after `position`. Borrows and other pools'
/// loans in between are skipped: a second borrow is caught by the pool mutex,
/// not here.
pub fn find_settling_repay(
    position: usize,
    pool: &Pubkey,
    batch: &[BatchEntry],
) -> Option<LoanCall> {
    batch
        .iter()
        .skip(position + 1)
        .filter_map(|entry| entry.call)
        .find(|call| call.is(LoanInstruction::Repay, pool))
}

/// Pre-flight for `borrow`, in order: top-level only, no loan already open on
/// the pool, and settled later in the same transaction by a repay of exactly
/// `amount` on the same pool.
pub fn check_borrow(
    call: &CallContext,
    pool_key: &Pubkey,
    pool: &Pool,
    amount: u64,
    batch: &[BatchEntry],
) -> Result<()> {
    require!(call.is_top_level(), VaultError::NestedBorrowForbidden);

    // Depth 0 means the runtime invoked us directly, so the instruction at our
    // position must be this very borrow. Anything else is a forged view.
    let current = batch
        .get(call.position)
        .and_then(|entry| entry.call)
        .filter(|c| c.is(LoanInstruction::Borrow, pool_key) && c.amount == amount);
    require!(current.is_some(), VaultError::NestedBorrowForbidden);

    require!(!pool.borrow_in_progress, VaultError::ReentrantBorrow);

    let repay = find_settling_repay(call.position, pool_key, batch)
        .ok_or_else(|| error!(VaultError::NoMatchingRepay))?;
    require!(repay.amount == amount, VaultError::AmountMismatch);

    Ok(())
}

/// Pre-flight for `repay`. A nested repay could clear the mutex early and let
/// a second borrow through while the first one is still out.
pub fn check_repay(call: &CallContext) -> Result<()> {
    require!(call.is_top_level(), VaultError::NestedRepayForbidden);
    Ok(())
}

/// Batch-boundary check. A pool still marked borrowed here means a loan
/// escaped its transaction; that is a consistency fault, never cleared.
pub fn ensure_settled(pool: &Pool) -> Result<()> {
    require!(pool.is_idle(), VaultError::UnsettledLoan);
    Ok(())
}

// ---------------------------------------------------------------------------
// On-chain loaders
// ---------------------------------------------------------------------------

pub fn current_call_context(instructions: &AccountInfo) -> Result<CallContext> {
    let position = load_current_index_checked(instructions)? as usize;
    let depth = get_stack_height().saturating_sub(TRANSACTION_LEVEL_STACK_HEIGHT) as u32;
    Ok(CallContext { depth, position })
}

pub fn load_batch(instructions: &AccountInfo) -> Result<Vec<BatchEntry>> {
    // Serialized sysvar starts with the instruction count as a u16.
    let count = {
        let data = instructions.try_borrow_data()?;
        let bytes: [u8; 2] = data
            .get(..2)
            .and_then(|b| b.try_into().ok())
            .ok_or(ProgramError::InvalidAccountData)?;
        u16::from_le_bytes(bytes) as usize
    };

    let mut batch = Vec::with_capacity(count);
    for index in 0..count {
        let instruction = load_instruction_at_checked(index, instructions)?;
        let accounts: Vec<Pubkey> = instruction.accounts.iter().map(|meta| meta.pubkey).collect();
        batch.push(BatchEntry::new(instruction.program_id, &accounts, &instruction.data));
    }
    Ok(batch)
}
