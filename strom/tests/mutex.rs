use std::sync::Arc;

use strom::sync::{Mutex, PoisonError, TryLockError};

#[strom::test]
async fn lock() {
  let mutex = Mutex::new(0);

  let lock = mutex.try_lock();
  assert!(lock.is_ok());
  assert!(mutex
    .try_lock()
    .is_err_and(|err| err == TryLockError::UnableToAcquireLock));

  let mut value = lock.unwrap();
  *value += 1;
  drop(value);

  let value = mutex.lock().await.unwrap();
  assert_eq!(*value, 1);
}

#[strom::test]
async fn owned_guard_releases_from_any_thread() {
  let mutex = Arc::new(Mutex::new(String::from("owned")));

  let guard = mutex.clone().lock_owned().await.unwrap();
  assert!(mutex.is_locked());
  assert_eq!(guard.as_str(), "owned");

  // Guards can be released on another thread.
  std::thread::spawn(move || drop(guard)).join().unwrap();
  assert!(!mutex.is_locked());
}

#[test]
fn poisoned_mutex_refuses_lockers() {
  let mutex = Mutex::new(());
  mutex.poison();

  assert!(mutex.is_poisoned());
  assert_eq!(mutex.lock_blocking().err(), Some(PoisonError));
  assert!(matches!(mutex.try_lock(), Err(TryLockError::Poisoned(_))));
}
