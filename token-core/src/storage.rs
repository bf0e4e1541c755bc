//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `tokens` - Created tokens (key: creation index, big-endian u64)
//! - `balances` - Latest balances (key: token || account, value: big-endian u128)
//! - `events` - Append-only event journal (key: sequence, big-endian u64)
//! - `recipients` - Classes of programmable accounts (key: account)
//!
//! Every [`Commit`] is written with a single `WriteBatch`, so a crash never
//! leaves half a transfer on disk.

use crate::{
    error::{Error, Result},
    state::{BalanceWrite, Commit, CreatedToken, RecoveredState},
    recipient::RecipientClass,
    types::{AccountId, Amount, EventRecord, ADDRESS_LEN},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use std::sync::Arc;

/// Column family names
const CF_TOKENS: &str = "tokens";
const CF_BALANCES: &str = "balances";
const CF_EVENTS: &str = "events";
const CF_RECIPIENTS: &str = "recipients";

const BALANCE_KEY_LEN: usize = ADDRESS_LEN * 2;

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("path", &self.db.path()).finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.storage.data_dir;
        let tuning = &config.storage.rocksdb;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(tuning.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(tuning.max_write_buffer_number);
        db_opts.set_target_file_size_base(tuning.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(tuning.max_background_jobs);
        db_opts.set_level_zero_file_num_compaction_trigger(
            tuning.level0_file_num_compaction_trigger,
        );

        // Universal compaction for write-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if tuning.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_TOKENS, Self::cf_options_tokens()),
            ColumnFamilyDescriptor::new(CF_BALANCES, Self::cf_options_balances()),
            ColumnFamilyDescriptor::new(CF_EVENTS, Self::cf_options_events()),
            ColumnFamilyDescriptor::new(CF_RECIPIENTS, Self::cf_options_tokens()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB token store");

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_tokens() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_balances() -> Options {
        let mut opts = Options::default();
        // Balances are read on every transfer, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_options_events() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Writes

    /// Persist a commit atomically
    pub fn commit(&self, commit: &Commit) -> Result<()> {
        let mut batch = WriteBatch::default();

        if let Some(created) = &commit.created {
            let cf_tokens = self.cf_handle(CF_TOKENS)?;
            batch.put_cf(cf_tokens, created.index.to_be_bytes(), bincode::serialize(created)?);
        }

        let cf_balances = self.cf_handle(CF_BALANCES)?;
        for write in &commit.balance_writes {
            batch.put_cf(
                cf_balances,
                Self::balance_key(&write.token, &write.account),
                write.amount.to_be_bytes(),
            );
        }

        let cf_recipients = self.cf_handle(CF_RECIPIENTS)?;
        for write in &commit.recipient_writes {
            match write.class {
                Some(class) => batch.put_cf(
                    cf_recipients,
                    write.account.as_bytes(),
                    bincode::serialize(&class)?,
                ),
                None => batch.delete_cf(cf_recipients, write.account.as_bytes()),
            }
        }

        let cf_events = self.cf_handle(CF_EVENTS)?;
        for record in &commit.records {
            batch.put_cf(cf_events, record.sequence.to_be_bytes(), bincode::serialize(record)?);
        }

        // Atomic commit
        self.db.write(batch)?;

        tracing::debug!(
            balance_writes = commit.balance_writes.len(),
            recipient_writes = commit.recipient_writes.len(),
            records = commit.records.len(),
            "Commit persisted"
        );

        Ok(())
    }

    // Reads

    /// Stored balance (zero if never written)
    pub fn get_balance(&self, token: &AccountId, account: &AccountId) -> Result<Amount> {
        let cf = self.cf_handle(CF_BALANCES)?;
        match self.db.get_cf(cf, Self::balance_key(token, account))? {
            Some(value) => Self::decode_amount(&value),
            None => Ok(0),
        }
    }

    /// Journal records starting at `sequence`
    pub fn get_events_from(&self, sequence: u64, limit: usize) -> Result<Vec<EventRecord>> {
        let cf = self.cf_handle(CF_EVENTS)?;
        let start = sequence.to_be_bytes();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start[..], Direction::Forward));

        let mut events = Vec::new();
        for item in iter.take(limit) {
            let (_, value) = item?;
            events.push(bincode::deserialize(&value)?);
        }

        Ok(events)
    }

    /// Load everything needed to rebuild the in-memory state
    pub fn load(&self) -> Result<RecoveredState> {
        let mut recovered = RecoveredState::default();

        let cf_tokens = self.cf_handle(CF_TOKENS)?;
        for item in self.db.iterator_cf(cf_tokens, IteratorMode::Start) {
            let (_, value) = item?;
            let created: CreatedToken = bincode::deserialize(&value)?;
            recovered.tokens.push(created);
        }

        let cf_balances = self.cf_handle(CF_BALANCES)?;
        for item in self.db.iterator_cf(cf_balances, IteratorMode::Start) {
            let (key, value) = item?;
            let (token, account) = Self::split_balance_key(&key)?;
            recovered.balances.push(BalanceWrite {
                token,
                account,
                amount: Self::decode_amount(&value)?,
            });
        }

        let cf_recipients = self.cf_handle(CF_RECIPIENTS)?;
        for item in self.db.iterator_cf(cf_recipients, IteratorMode::Start) {
            let (key, value) = item?;
            let account = Self::decode_account(&key)?;
            let class: RecipientClass = bincode::deserialize(&value)?;
            recovered.recipients.push((account, class));
        }

        recovered.events = self.get_events_from(0, usize::MAX)?;

        tracing::info!(
            tokens = recovered.tokens.len(),
            balances = recovered.balances.len(),
            events = recovered.events.len(),
            recipients = recovered.recipients.len(),
            "Loaded ledger from storage"
        );

        Ok(recovered)
    }

    // Key helpers

    fn balance_key(token: &AccountId, account: &AccountId) -> [u8; BALANCE_KEY_LEN] {
        let mut key = [0u8; BALANCE_KEY_LEN];
        key[..ADDRESS_LEN].copy_from_slice(token.as_bytes());
        key[ADDRESS_LEN..].copy_from_slice(account.as_bytes());
        key
    }

    fn split_balance_key(key: &[u8]) -> Result<(AccountId, AccountId)> {
        if key.len() != BALANCE_KEY_LEN {
            return Err(Error::Storage(format!("Malformed balance key of {} bytes", key.len())));
        }
        let mut token = [0u8; ADDRESS_LEN];
        let mut account = [0u8; ADDRESS_LEN];
        token.copy_from_slice(&key[..ADDRESS_LEN]);
        account.copy_from_slice(&key[ADDRESS_LEN..]);
        Ok((AccountId::from_bytes(token), AccountId::from_bytes(account)))
    }

    fn decode_account(key: &[u8]) -> Result<AccountId> {
        let bytes: [u8; ADDRESS_LEN] = key
            .try_into()
            .map_err(|_| Error::Storage(format!("Malformed account key of {} bytes", key.len())))?;
        Ok(AccountId::from_bytes(bytes))
    }

    fn decode_amount(value: &[u8]) -> Result<Amount> {
        let bytes: [u8; 16] = value
            .try_into()
            .map_err(|_| Error::Storage(format!("Malformed balance of {} bytes", value.len())))?;
        Ok(Amount::from_be_bytes(bytes))
    }

    /// Drop a column family so that later commits fail
    #[cfg(test)]
    pub(crate) fn drop_column_family(&mut self, name: &str) -> Result<()> {
        let db = Arc::get_mut(&mut self.db)
            .ok_or_else(|| Error::Storage("database handle is shared".to_string()))?;
        db.drop_cf(name)?;
        Ok(())
    }
}
