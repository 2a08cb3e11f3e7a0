//! Balance ledger shared by the room and the HTTP bootstrap/admin handlers.
//!
//! All mutations take the ledger lock for their whole read-modify-write, so a
//! round settlement and an admin charge against the same user never
//! interleave. Durability goes through a [`LedgerStore`] driven by a writer
//! thread, so callers on the async runtime never touch the disk. The
//! in-memory state stays authoritative when a write fails.

use serde::{Deserialize, Serialize};
use stakeroom_protocol::UserId;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::error;
use uuid::Uuid;

/// Flush requests waiting for the writer. One pending request is enough: it
/// snapshots whatever the balances are when the writer picks it up.
const PENDING_FLUSHES: usize = 1;

/// One user record. Serialized as `{ "uuid": <secret>, "balance": <n> }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Redemption secret handed to the user once.
    #[serde(rename = "uuid")]
    pub secret: String,
    pub balance: u64,
}

pub type Accounts = BTreeMap<UserId, Account>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("user not found: {0}")]
    UnknownUser(UserId),
    #[error("insufficient balance for {user}: have {balance}, need {amount}")]
    InsufficientBalance {
        user: UserId,
        balance: u64,
        amount: u64,
    },
    #[error("balance overflow for {0}")]
    Overflow(UserId),
    #[error("ledger io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Physical storage behind the ledger.
pub trait LedgerStore: Send + Sync {
    fn load(&self) -> Result<Accounts, LedgerError>;
    fn save(&self, accounts: &Accounts) -> Result<(), LedgerError>;
}

/// Flat JSON file keyed by user id.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl LedgerStore for JsonFileStore {
    fn load(&self) -> Result<Accounts, LedgerError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Accounts::new()),
            Err(err) => Err(self.io_error(&self.path, err)),
        }
    }

    fn save(&self, accounts: &Accounts) -> Result<(), LedgerError> {
        let bytes = serde_json::to_vec_pretty(accounts)?;
        let temp = self.temp_path();
        let mut file = File::create(&temp).map_err(|err| self.io_error(&temp, err))?;
        file.write_all(&bytes)
            .and_then(|()| file.sync_all())
            .map_err(|err| self.io_error(&temp, err))?;
        drop(file);
        std::fs::rename(&temp, &self.path).map_err(|err| self.io_error(&self.path, err))
    }
}

/// Store that keeps the last flushed snapshot in memory.
#[derive(Default)]
pub struct MemoryStore {
    saved: Mutex<Option<Accounts>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<Accounts> {
        lock_or_recover(&self.saved, "memory store").clone()
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self) -> Result<Accounts, LedgerError> {
        Ok(self.snapshot().unwrap_or_default())
    }

    fn save(&self, accounts: &Accounts) -> Result<(), LedgerError> {
        *lock_or_recover(&self.saved, "memory store") = Some(accounts.clone());
        Ok(())
    }
}

impl<S: LedgerStore + ?Sized> LedgerStore for Arc<S> {
    fn load(&self) -> Result<Accounts, LedgerError> {
        (**self).load()
    }

    fn save(&self, accounts: &Accounts) -> Result<(), LedgerError> {
        (**self).save(accounts)
    }
}

fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("{what} lock poisoned; recovering");
            poisoned.into_inner()
        }
    }
}

/// State shared between the ledger handle and its writer thread.
struct Shared {
    accounts: Mutex<Accounts>,
    // Held across snapshot and save so writes land in snapshot order.
    write_lock: Mutex<()>,
    store: Box<dyn LedgerStore>,
}

impl Shared {
    fn write(&self) -> Result<(), LedgerError> {
        let _write = lock_or_recover(&self.write_lock, "ledger write");
        let snapshot = lock_or_recover(&self.accounts, "ledger").clone();
        self.store.save(&snapshot)
    }
}

fn writer(shared: Arc<Shared>, mut requests: mpsc::Receiver<()>) {
    while requests.blocking_recv().is_some() {
        if let Err(err) = shared.write() {
            error!(?err, "ledger write failed; balances kept in memory");
        }
    }
}

pub struct Ledger {
    shared: Arc<Shared>,
    flushes: mpsc::Sender<()>,
}

impl Ledger {
    /// Open a ledger, loading whatever the store already holds, and start its
    /// writer thread.
    pub fn open(store: impl LedgerStore + 'static) -> Result<Self, LedgerError> {
        let accounts = store.load()?;
        tracing::info!(users = accounts.len(), "ledger loaded");
        Ok(Self::start(accounts, Box::new(store)))
    }

    pub fn in_memory() -> Self {
        Self::start(Accounts::new(), Box::new(MemoryStore::new()))
    }

    fn start(accounts: Accounts, store: Box<dyn LedgerStore>) -> Self {
        let shared = Arc::new(Shared {
            accounts: Mutex::new(accounts),
            write_lock: Mutex::new(()),
            store,
        });
        let (flushes, requests) = mpsc::channel(PENDING_FLUSHES);
        let worker = Arc::clone(&shared);
        std::thread::spawn(move || writer(worker, requests));
        Self { shared, flushes }
    }

    fn accounts(&self) -> MutexGuard<'_, Accounts> {
        lock_or_recover(&self.shared.accounts, "ledger")
    }

    pub fn get(&self, user: &UserId) -> Option<Account> {
        self.accounts().get(user).cloned()
    }

    pub fn balance(&self, user: &UserId) -> Option<u64> {
        self.accounts().get(user).map(|account| account.balance)
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.accounts().contains_key(user)
    }

    pub fn len(&self) -> usize {
        self.accounts().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a user with a fresh identity and redemption secret.
    pub fn create(&self, initial_balance: u64) -> (UserId, Account) {
        let mut accounts = self.accounts();
        let user = loop {
            let candidate = UserId::new(Uuid::new_v4().to_string());
            if !accounts.contains_key(&candidate) {
                break candidate;
            }
        };
        let account = Account {
            secret: Uuid::new_v4().to_string(),
            balance: initial_balance,
        };
        accounts.insert(user.clone(), account.clone());
        (user, account)
    }

    /// Returns the account for `user`, creating it when absent. The flag is
    /// true when the account was created by this call.
    pub fn create_if_absent(&self, user: &UserId, initial_balance: u64) -> (Account, bool) {
        let mut accounts = self.accounts();
        if let Some(account) = accounts.get(user) {
            return (account.clone(), false);
        }
        let account = Account {
            secret: Uuid::new_v4().to_string(),
            balance: initial_balance,
        };
        accounts.insert(user.clone(), account.clone());
        (account, true)
    }

    /// Credit (positive delta) or debit (negative delta) one user.
    pub fn adjust(&self, user: &UserId, delta: i64) -> Result<u64, LedgerError> {
        self.transact(|tx| {
            if delta >= 0 {
                tx.credit(user, delta.unsigned_abs())
            } else {
                tx.debit(user, delta.unsigned_abs())
            }
        })
    }

    /// Run `f` against the accounts under the ledger lock.
    ///
    /// Every change made through the [`Transaction`] is undone if `f` returns
    /// an error.
    pub fn transact<T, E>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut accounts = self.accounts();
        let mut tx = Transaction {
            accounts: &mut *accounts,
            journal: Vec::new(),
        };
        let result = f(&mut tx);
        if result.is_err() {
            tx.rollback();
        }
        result
    }

    /// Ask the writer thread to save the current balances. Never blocks.
    ///
    /// When a flush is already pending this is a no-op: the pending one
    /// snapshots the balances at write time, which includes this change.
    pub fn persist(&self) {
        if let Err(mpsc::error::TrySendError::Closed(())) = self.flushes.try_send(()) {
            error!("ledger writer stopped; balances not persisted");
        }
    }

    /// Save the current balances on the calling thread.
    ///
    /// Blocking; keep it off the async request path.
    pub fn flush(&self) -> Result<(), LedgerError> {
        self.shared.write()
    }
}

/// Staged balance changes inside [`Ledger::transact`].
pub struct Transaction<'a> {
    accounts: &'a mut Accounts,
    journal: Vec<(UserId, u64)>,
}

impl Transaction<'_> {
    pub fn balance(&self, user: &UserId) -> Option<u64> {
        self.accounts.get(user).map(|account| account.balance)
    }

    pub fn debit(&mut self, user: &UserId, amount: u64) -> Result<u64, LedgerError> {
        let account = self
            .accounts
            .get_mut(user)
            .ok_or_else(|| LedgerError::UnknownUser(user.clone()))?;
        let next = account
            .balance
            .checked_sub(amount)
            .ok_or_else(|| LedgerError::InsufficientBalance {
                user: user.clone(),
                balance: account.balance,
                amount,
            })?;
        self.journal.push((user.clone(), account.balance));
        account.balance = next;
        Ok(next)
    }

    pub fn credit(&mut self, user: &UserId, amount: u64) -> Result<u64, LedgerError> {
        let account = self
            .accounts
            .get_mut(user)
            .ok_or_else(|| LedgerError::UnknownUser(user.clone()))?;
        let next = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow(user.clone()))?;
        self.journal.push((user.clone(), account.balance));
        account.balance = next;
        Ok(next)
    }

    fn rollback(&mut self) {
        while let Some((user, previous)) = self.journal.pop() {
            if let Some(account) = self.accounts.get_mut(&user) {
                account.balance = previous;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn eventually(mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        check()
    }

    fn seeded(users: &[(&str, u64)]) -> Ledger {
        let ledger = Ledger::in_memory();
        for (name, balance) in users {
            ledger.create_if_absent(&UserId::from(*name), *balance);
        }
        ledger
    }

    #[test]
    fn test_create_issues_distinct_identity_and_secret() {
        let ledger = Ledger::in_memory();
        let (first, first_account) = ledger.create(10);
        let (second, second_account) = ledger.create(10);
        assert_ne!(first, second);
        assert_ne!(first_account.secret, second_account.secret);
        assert_ne!(first.as_str(), first_account.secret);
        assert_eq!(ledger.balance(&first), Some(10));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_create_if_absent_keeps_existing() {
        let ledger = Ledger::in_memory();
        let alice = UserId::from("alice");
        let (created, was_created) = ledger.create_if_absent(&alice, 10);
        assert!(was_created);
        ledger.adjust(&alice, 5).unwrap();
        let (existing, was_created) = ledger.create_if_absent(&alice, 10);
        assert!(!was_created);
        assert_eq!(existing.secret, created.secret);
        assert_eq!(existing.balance, 15);
    }

    #[test]
    fn test_adjust() {
        let ledger = seeded(&[("alice", 10)]);
        let alice = UserId::from("alice");
        assert_eq!(ledger.adjust(&alice, 25).unwrap(), 35);
        assert_eq!(ledger.adjust(&alice, -35).unwrap(), 0);

        let err = ledger.adjust(&alice, -1).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { balance: 0, amount: 1, .. }));
        assert_eq!(ledger.balance(&alice), Some(0));

        let err = ledger.adjust(&UserId::from("nobody"), 5).unwrap_err();
        assert!(matches!(err, LedgerError::UnknownUser(_)));
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let ledger = seeded(&[("alice", 40), ("bob", 60)]);
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        let result: Result<(), LedgerError> = ledger.transact(|tx| {
            tx.debit(&alice, 40)?;
            tx.credit(&bob, 40)?;
            tx.debit(&bob, 1_000)?;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(ledger.balance(&alice), Some(40));
        assert_eq!(ledger.balance(&bob), Some(60));
    }

    #[test]
    fn test_transaction_commits_on_success() {
        let ledger = seeded(&[("alice", 40), ("bob", 60)]);
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        ledger
            .transact(|tx| -> Result<(), LedgerError> {
                tx.debit(&alice, 40)?;
                tx.debit(&bob, 60)?;
                tx.credit(&bob, 100)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(ledger.balance(&alice), Some(0));
        assert_eq!(ledger.balance(&bob), Some(100));
    }

    #[test]
    fn test_memory_store_receives_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::open(store.clone()).unwrap();
        assert!(ledger.is_empty());
        let (user, _) = ledger.create(10);
        assert!(store.snapshot().is_none());
        ledger.flush().unwrap();
        assert_eq!(store.snapshot().unwrap()[&user].balance, 10);
    }

    #[test]
    fn test_persist_writes_in_background() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::open(store.clone()).unwrap();
        let (user, _) = ledger.create(10);
        for delta in 1..=20 {
            ledger.adjust(&user, delta).unwrap();
            ledger.persist();
        }
        let expected = 10 + (1..=20).sum::<i64>() as u64;
        assert!(eventually(|| store
            .snapshot()
            .is_some_and(|accounts| accounts[&user].balance == expected)));
    }

    #[test]
    fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");

        let ledger = Ledger::open(JsonFileStore::new(&path)).unwrap();
        assert!(ledger.is_empty());
        let (user, account) = ledger.create(10);
        ledger.adjust(&user, 7).unwrap();
        ledger.flush().unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw[user.as_str()]["balance"], 17);
        assert_eq!(raw[user.as_str()]["uuid"], account.secret.as_str());

        let reopened = Ledger::open(JsonFileStore::new(&path)).unwrap();
        assert_eq!(reopened.balance(&user), Some(17));
        assert!(!dir.path().join("db.json.tmp").exists());
    }

    #[test]
    fn test_json_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let err = Ledger::open(JsonFileStore::new(&path)).err().unwrap();
        assert!(matches!(err, LedgerError::Encoding(_)));
    }

    #[test]
    fn test_json_store_persist_failure_keeps_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("db.json");
        let ledger = Ledger::open(JsonFileStore::new(&path)).unwrap();
        let (user, _) = ledger.create(10);
        let err = ledger.flush().unwrap_err();
        assert!(matches!(err, LedgerError::Io { .. }));
        ledger.persist();
        assert_eq!(ledger.balance(&user), Some(10));
    }
}
