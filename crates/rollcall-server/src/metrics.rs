//! Prometheus recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder. Call once at startup, before
/// anything records.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::counter;
    use rollcall_telemetry::metrics::OPERATIONS_TOTAL;

    #[test]
    fn local_recorder_renders_recorded_counter() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            counter!(OPERATIONS_TOTAL, "op" => "start", "outcome" => "ok").increment(1);
        });
        let output = render(&handle);
        assert!(output.contains(OPERATIONS_TOTAL), "{output}");
        assert!(output.contains(r#"op="start""#), "{output}");
    }
}
