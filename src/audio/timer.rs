use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Temporizador de un solo disparo, reiniciable.
///
/// No lanza tareas propias: el loop del player espera a [`Timer::fired`]
/// dentro de su `select!`, de modo que el disparo se procesa en el mismo punto
/// de serialización que los comandos.
#[derive(Debug, Default)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arma el timer; cancela cualquier disparo pendiente.
    ///
    /// Un retraso que no cabe en un `Instant` deja el timer desarmado: nunca vence.
    pub fn arm(&mut self, after: Duration) {
        self.deadline = Instant::now().checked_add(after);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Se resuelve cuando vence el deadline; nunca si está desarmado.
    pub async fn fired(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rearm_replaces_pending_deadline() {
        let mut timer = Timer::new();
        timer.arm(Duration::from_secs(5));
        let first = timer.deadline().unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        timer.arm(Duration::from_secs(5));
        assert!(timer.deadline().unwrap() > first);

        timer.disarm();
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_delay_leaves_timer_disarmed() {
        let mut timer = Timer::new();
        timer.arm(Duration::from_secs(5));
        timer.arm(Duration::from_secs(u64::MAX));
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_timer_never_fires() {
        let result =
            tokio::time::timeout(Duration::from_secs(3600), Timer::fired(None)).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn armed_timer_fires_at_deadline() {
        let start = Instant::now();
        let mut timer = Timer::new();
        timer.arm(Duration::from_secs(5));
        Timer::fired(timer.deadline()).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
