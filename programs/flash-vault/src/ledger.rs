use anchor_lang::prelude::*;
use anchor_lang::solana_program::program_option::COption;
use anchor_spl::token::{self, Burn, MintTo, TokenAccount, Transfer};

/// Snapshot of a token account as the vault needs to see it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Holding {
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount: u64,
    pub delegate: Option<Pubkey>,
    pub delegated_amount: u64,
}

impl Holding {
    /// Amount `delegate` may move out of this account without the owner signing.
    pub fn allowance_for(&self, delegate: &Pubkey) -> u64 {
        match self.delegate {
            Some(d) if d == *delegate => self.delegated_amount,
            _ => 0,
        }
    }
}

impl From<&TokenAccount> for Holding {
    fn from(account: &TokenAccount) -> Self {
        Holding {
            mint: account.mint,
            owner: account.owner,
            amount: account.amount,
            delegate: match account.delegate {
                COption::Some(d) => Some(d),
                COption::None => None,
            },
            delegated_amount: account.delegated_amount,
        }
    }
}

/// The fungible-asset ledger the vault moves funds through.
///
/// `authority` is whoever signs the movement: the account owner, or a delegate
/// spending a prior approval. The ledger decides which and enforces limits;
/// the vault checks balances up front so failures carry vault error codes.
pub trait AssetLedger {
    fn holding(&self, account: &Pubkey) -> Result<Holding>;

    fn transfer(
        &mut self,
        from: &Pubkey,
        to: &Pubkey,
        authority: &Pubkey,
        amount: u64,
    ) -> Result<()>;

    /// Mint authority is always the registry.
    fn mint_to(&mut self, mint: &Pubkey, to: &Pubkey, amount: u64) -> Result<()>;

    fn burn(
        &mut self,
        mint: &Pubkey,
        from: &Pubkey,
        authority: &Pubkey,
        amount: u64,
    ) -> Result<()>;
}

/// SPL Token implementation. Every CPI is signed with the registry seeds so
/// the registry PDA can act as reserve owner, mint authority and delegate;
/// user-signed movements (repay) carry the user's own signer flag.
pub struct SplLedger<'a, 'info> {
    token_program: AccountInfo<'info>,
    registry: AccountInfo<'info>,
    registry_seeds: &'a [&'a [u8]],
    accounts: Vec<AccountInfo<'info>>,
}

impl<'a, 'info> SplLedger<'a, 'info> {
    pub fn new(
        token_program: AccountInfo<'info>,
        registry: AccountInfo<'info>,
        registry_seeds: &'a [&'a [u8]],
        accounts: Vec<AccountInfo<'info>>,
    ) -> Self {
        Self {
            token_program,
            registry,
            registry_seeds,
            accounts,
        }
    }

    fn account(&self, key: &Pubkey) -> Result<AccountInfo<'info>> {
        if *key == self.registry.key() {
            return Ok(self.registry.clone());
        }
        self.accounts
            .iter()
            .find(|info| info.key == key)
            .cloned()
            .ok_or_else(|| error!(anchor_lang::error::ErrorCode::AccountNotEnoughKeys))
    }
}

impl<'a, 'info> AssetLedger for SplLedger<'a, 'info> {
    fn holding(&self, account: &Pubkey) -> Result<Holding> {
        // Re-read from account data: earlier CPIs in this instruction may have
        // changed it since Anchor deserialized the context.
        let info = self.account(account)?;
        let data = info.try_borrow_data()?;
        let token_account = TokenAccount::try_deserialize(&mut &data[..])?;
        Ok(Holding::from(&token_account))
    }

    fn transfer(
        &mut self,
        from: &Pubkey,
        to: &Pubkey,
        authority: &Pubkey,
        amount: u64,
    ) -> Result<()> {
        let cpi_accounts = Transfer {
            from: self.account(from)?,
            to: self.account(to)?,
            authority: self.account(authority)?,
        };
        let signer = [self.registry_seeds];
        let cpi_ctx =
            CpiContext::new_with_signer(self.token_program.clone(), cpi_accounts, &signer);
        token::transfer(cpi_ctx, amount)
    }

    fn mint_to(&mut self, mint: &Pubkey, to: &Pubkey, amount: u64) -> Result<()> {
        let cpi_accounts = MintTo {
            mint: self.account(mint)?,
            to: self.account(to)?,
            authority: self.registry.clone(),
        };
        let signer = [self.registry_seeds];
        let cpi_ctx =
            CpiContext::new_with_signer(self.token_program.clone(), cpi_accounts, &signer);
        token::mint_to(cpi_ctx, amount)
    }

    fn burn(
        &mut self,
        mint: &Pubkey,
        from: &Pubkey,
        authority: &Pubkey,
        amount: u64,
    ) -> Result<()> {
        let cpi_accounts = Burn {
            mint: self.account(mint)?,
            from: self.account(from)?,
            authority: self.account(authority)?,
        };
        let signer = [self.registry_seeds];
        let cpi_ctx =
            CpiContext::new_with_signer(self.token_program.clone(), cpi_accounts, &signer);
        token::burn(cpi_ctx, amount)
    }
}
