use std::{
    future::{Ready, ready},
    sync::{Arc, Mutex},
    time::Duration,
};

/// Records requested sleeps instead of sleeping.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingSleeper {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl backoff::future::Sleeper for RecordingSleeper {
    type Sleep = Ready<()>;

    fn sleep(&self, duration: Duration) -> Self::Sleep {
        self.sleeps.lock().unwrap().push(duration);
        ready(())
    }
}
