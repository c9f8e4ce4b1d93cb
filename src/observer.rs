use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::auth_state::AuthState;

/// Capability of a consumer that reflects the authentication state of the credential it uses.
pub trait StatusObserver: Send + Sync {
    fn on_status_changed(&self, state: &AuthState);
}

/// A credential owner that dependents can subscribe to.
pub trait StatusSource: Send + Sync {
    fn auth_state(&self) -> AuthState;

    /// Adds `observer` to the dependents (at most once) and immediately notifies it of the
    /// current state.
    fn register_dependent(&self, observer: &Arc<dyn StatusObserver>);

    fn unregister_dependent(&self, observer: &Arc<dyn StatusObserver>);
}

/// Set of weakly referenced observers, notified in registration order.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Mutex<Vec<Weak<dyn StatusObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the observer was already registered.
    pub fn register(&self, observer: &Arc<dyn StatusObserver>) -> bool {
        let candidate = Arc::downgrade(observer);
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        observers.retain(|o| o.strong_count() > 0);
        if observers.iter().any(|o| Weak::ptr_eq(o, &candidate)) {
            return false;
        }
        observers.push(candidate);
        true
    }

    /// Returns `false` if the observer was not registered.
    pub fn unregister(&self, observer: &Arc<dyn StatusObserver>) -> bool {
        let target = Arc::downgrade(observer);
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|o| o.strong_count() > 0 && !Weak::ptr_eq(o, &target));
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|o| o.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notifies every live observer. The registry lock is released before any callback runs, so
    /// observers may register or unregister from within `on_status_changed`.
    pub fn notify(&self, state: &AuthState) {
        let live: Vec<Arc<dyn StatusObserver>> = {
            let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in live {
            observer.on_status_changed(state);
        }
    }
}

/// Scoped registration of a dependent: registers on creation, unregisters when dropped.
pub struct Registration {
    source: Arc<dyn StatusSource>,
    observer: Arc<dyn StatusObserver>,
}

impl Registration {
    pub fn new(source: Arc<dyn StatusSource>, observer: Arc<dyn StatusObserver>) -> Self {
        source.register_dependent(&observer);
        Self { source, observer }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.source.unregister_dependent(&self.observer);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use mockall::mock;
    use mockall::predicate::eq;

    mock! {
        pub Observer {}

        impl StatusObserver for Observer {
            fn on_status_changed(&self, state: &AuthState);
        }
    }

    /// Observer recording every state it is notified of.
    #[derive(Default)]
    pub(crate) struct RecordingObserver {
        pub(crate) seen: Mutex<Vec<AuthState>>,
    }

    impl RecordingObserver {
        pub(crate) fn seen(&self) -> Vec<AuthState> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl StatusObserver for RecordingObserver {
        fn on_status_changed(&self, state: &AuthState) {
            self.seen.lock().unwrap().push(state.clone());
        }
    }

    #[test]
    fn registering_twice_notifies_once() {
        let registry = ObserverRegistry::new();
        let mut observer = MockObserver::new();
        observer
            .expect_on_status_changed()
            .with(eq(AuthState::Authenticating))
            .once()
            .return_const(());
        let observer: Arc<dyn StatusObserver> = Arc::new(observer);

        assert!(registry.register(&observer));
        assert!(!registry.register(&observer));
        registry.notify(&AuthState::Authenticating);

        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn notifies_in_registration_order() {
        let registry = ObserverRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        struct Named(&'static str, Arc<Mutex<Vec<&'static str>>>);
        impl StatusObserver for Named {
            fn on_status_changed(&self, _: &AuthState) {
                self.1.lock().unwrap().push(self.0);
            }
        }

        let first: Arc<dyn StatusObserver> = Arc::new(Named("first", order.clone()));
        let second: Arc<dyn StatusObserver> = Arc::new(Named("second", order.clone()));
        registry.register(&first);
        registry.register(&second);

        registry.notify(&AuthState::Authenticated);

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn unregistered_and_dropped_observers_are_not_notified() {
        let registry = ObserverRegistry::new();
        let kept = Arc::new(RecordingObserver::default());
        let kept_dyn: Arc<dyn StatusObserver> = kept.clone();
        let removed: Arc<dyn StatusObserver> = Arc::new(RecordingObserver::default());
        let dropped: Arc<dyn StatusObserver> = Arc::new(RecordingObserver::default());
        registry.register(&kept_dyn);
        registry.register(&removed);
        registry.register(&dropped);

        assert!(registry.unregister(&removed));
        assert!(!registry.unregister(&removed));
        drop(dropped);
        registry.notify(&AuthState::Authenticating);

        assert_eq!(kept.seen(), vec![AuthState::Authenticating]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn observers_may_unregister_while_being_notified() {
        struct SelfRemoving {
            registry: Arc<ObserverRegistry>,
            me: Mutex<Option<Arc<dyn StatusObserver>>>,
        }
        impl StatusObserver for SelfRemoving {
            fn on_status_changed(&self, _: &AuthState) {
                if let Some(me) = self.me.lock().unwrap().take() {
                    self.registry.unregister(&me);
                }
            }
        }

        let registry = Arc::new(ObserverRegistry::new());
        let observer = Arc::new(SelfRemoving {
            registry: registry.clone(),
            me: Mutex::new(None),
        });
        let observer_dyn: Arc<dyn StatusObserver> = observer.clone();
        *observer.me.lock().unwrap() = Some(observer_dyn.clone());
        registry.register(&observer_dyn);

        registry.notify(&AuthState::Authenticating);

        assert!(registry.is_empty());
    }
}
