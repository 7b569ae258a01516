use std::time::Duration;
use std::time::Instant;
use tracing::info;

use crate::config::Autostop;
use crate::config::AutostopCondition;

/// Running totals of a capture, checked against the autostop conditions.
#[derive(Debug)]
pub struct AutostopEvaluator {
    conditions: Vec<AutostopCondition>,
    started: Instant,
    packets: u64,
    bytes: u64,
    files: u64,
    fired: Option<AutostopCondition>,
}

impl AutostopEvaluator {
    pub fn new(autostop: &Autostop) -> AutostopEvaluator {
        AutostopEvaluator {
            conditions: autostop.conditions.clone(),
            started: Instant::now(),
            packets: 0,
            bytes: 0,
            files: 0,
            fired: None,
        }
    }
    pub fn packet_written(&mut self, bytes: u64) {
        self.packets += 1;
        self.bytes += bytes;
    }
    /// Bytes written that are not packets, section headers and interfaces.
    pub fn bytes_written(&mut self, bytes: u64) {
        self.bytes += bytes;
    }
    /// An output file reached its rotation threshold.
    pub fn file_completed(&mut self) {
        self.files += 1;
    }
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
    fn reached(&self, condition: &AutostopCondition) -> bool {
        match *condition {
            AutostopCondition::Packets(n) => self.packets >= n,
            AutostopCondition::Bytes(n) => self.bytes >= n,
            AutostopCondition::Duration(d) => self.elapsed() >= d,
            AutostopCondition::Files(n) => self.files >= n,
        }
    }
    /// The first condition met, once met it stays met.
    pub fn check(&mut self) -> Option<AutostopCondition> {
        if self.fired.is_none() {
            self.fired = self.conditions.iter().find(|c| self.reached(c)).copied();
            if let Some(condition) = self.fired {
                info!(
                    "autostop {:?} reached after {} packets, {} bytes, {} files",
                    condition, self.packets, self.bytes, self.files
                );
            }
        }
        self.fired
    }
    pub fn fired(&self) -> Option<AutostopCondition> {
        self.fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packets_and_bytes() {
        let autostop = Autostop::new()
            .condition("packets:3")
            .unwrap()
            .condition("filesize:1")
            .unwrap();
        let mut evaluator = AutostopEvaluator::new(&autostop);
        evaluator.packet_written(100);
        evaluator.packet_written(100);
        assert!(evaluator.check().is_none());
        evaluator.packet_written(100);
        assert_eq!(evaluator.check(), Some(AutostopCondition::Packets(3)));

        let mut evaluator = AutostopEvaluator::new(&autostop);
        evaluator.bytes_written(900);
        evaluator.packet_written(100);
        assert_eq!(evaluator.check(), Some(AutostopCondition::Bytes(1000)));
    }
    #[test]
    fn files_completed() {
        let autostop = Autostop::new().condition("files:2").unwrap();
        let mut evaluator = AutostopEvaluator::new(&autostop);
        evaluator.file_completed();
        assert!(evaluator.check().is_none());
        evaluator.file_completed();
        assert_eq!(evaluator.check(), Some(AutostopCondition::Files(2)));
        assert_eq!(evaluator.fired(), Some(AutostopCondition::Files(2)));
    }
    #[test]
    fn duration_and_nothing() {
        let mut evaluator = AutostopEvaluator::new(&Autostop::new());
        evaluator.packet_written(1 << 30);
        assert!(evaluator.check().is_none());

        let mut autostop = Autostop::new();
        autostop.add(AutostopCondition::Duration(Duration::ZERO));
        let mut evaluator = AutostopEvaluator::new(&autostop);
        assert_eq!(
            evaluator.check(),
            Some(AutostopCondition::Duration(Duration::ZERO))
        );
    }
}
