use super::event_log::EventLog;
use super::position_manager::{CycleReport, PositionManager};
use crate::api::ExchangeGateway;

/// State owned by whoever drives the polling loop
///
/// The run flag is only consulted at the start of [`tick`](Self::tick), so
/// stopping never interrupts a cycle already in progress.
#[derive(Debug)]
pub struct Session {
    active: bool,
    cycles: u64,
    log: EventLog,
    last_report: Option<CycleReport>,
}

impl Session {
    pub fn new(event_log_capacity: usize) -> Self {
        Self {
            active: false,
            cycles: 0,
            log: EventLog::new(event_log_capacity),
            last_report: None,
        }
    }

    pub fn start(&mut self) {
        self.active = true;
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Completed cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn last_report(&self) -> Option<&CycleReport> {
        self.last_report.as_ref()
    }

    /// Run one cycle if the session is active
    pub async fn tick<G>(
        &mut self,
        manager: &mut PositionManager,
        gateway: &G,
    ) -> Option<&CycleReport>
    where
        G: ExchangeGateway + ?Sized,
    {
        if !self.active {
            return None;
        }

        let report = manager.run_cycle(gateway, &mut self.log).await;
        self.cycles += 1;
        self.last_report = Some(report);
        self.last_report.as_ref()
    }
}
