//! lifecycle — события хоста и политика хранения.
//!
//! Хост сообщает о фазах клиентов; стэш сам их не порождает. Из событий выводится:
//! - foreground: есть запущенные клиенты или идёт смена конфигурации;
//! - clear_allowed: clear() разрешён после create и после окончательного destroy;
//!   destroy ради пересоздания (finishing = false) его запрещает;
//! - холодный старт: первый Created в процессе без восстановленного состояния
//!   и с явным сигналом cold_start от хоста → однократный clear_all().

/// Host-delivered checkpoint notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A client was created. `restored` means it came with prior saved state;
    /// `cold_start` is the host's verdict that this is a fresh process start.
    Created { restored: bool, cold_start: bool },
    Started,
    Paused { changing_configuration: bool },
    Stopped,
    /// `finishing` is true for a final teardown, false for a recreation.
    Destroyed { finishing: bool },
}

/// What the stash has to do after an event was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reaction {
    None,
    /// Cold start: purge everything once.
    ClearAll,
    /// Process went to background: wait (bounded) for pending flushes.
    AwaitFlushes,
}

#[derive(Debug, Default)]
pub(crate) struct LifecycleState {
    started: i64,
    changing_configuration: bool,
    clear_allowed: bool,
    seen_create: bool,
}

impl LifecycleState {
    pub(crate) fn is_foreground(&self) -> bool {
        self.started > 0 || self.changing_configuration
    }

    pub(crate) fn clear_allowed(&self) -> bool {
        self.clear_allowed
    }

    pub(crate) fn apply(&mut self, ev: LifecycleEvent) -> Reaction {
        match ev {
            LifecycleEvent::Created { restored, cold_start } => {
                self.clear_allowed = true;
                self.changing_configuration = false;
                let first = !self.seen_create;
                self.seen_create = true;
                if first && !restored && cold_start {
                    return Reaction::ClearAll;
                }
                Reaction::None
            }
            LifecycleEvent::Started => {
                self.started += 1;
                Reaction::None
            }
            LifecycleEvent::Paused {
                changing_configuration,
            } => {
                self.changing_configuration = changing_configuration;
                Reaction::None
            }
            LifecycleEvent::Stopped => {
                self.started -= 1;
                if self.is_foreground() {
                    Reaction::None
                } else {
                    Reaction::AwaitFlushes
                }
            }
            LifecycleEvent::Destroyed { finishing } => {
                self.clear_allowed = finishing;
                Reaction::None
            }
        }
    }
}
