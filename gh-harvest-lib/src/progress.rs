/// Reporting of a long-running harvest.
pub trait Progress: Send + Sync {
    /// Set the phase label (e.g., "Harvesting").
    fn set_phase(&self, phase: &str);

    /// Poll `callback` for (total, current, message) while the phase runs.
    fn set_determinate(&self, callback: Box<dyn Fn() -> (u64, u64, String) + Send + Sync + 'static>);

    /// Finish and clear the progress indicator.
    fn done(&self);

    /// Whether output may use ANSI colors.
    fn use_colors(&self) -> bool {
        false
    }
}
