//! Human-readable conversion summary.

use colored::Colorize;
use pdm::OutputPlan;

use crate::convert::Job;

pub fn print(job: &Job, plan: &OutputPlan) {
    println!("{}", format!("Wrote {}", job.output.display()).green().bold());
    for line in lines(plan) {
        println!("{line}");
    }
    match plan.stream_config() {
        Ok(config) => println!(
            "{}",
            format!(
                "Device: StreamConfig::new({}, {})",
                config.baud_divisor(),
                config.sector_max()
            )
            .cyan()
            .bold()
        ),
        Err(e) => eprintln!(
            "{}",
            format!("Warning: this stream cannot be played as configured: {e}")
                .yellow()
                .bold()
        ),
    }
}

/// Report body, one entry per line, without colour.
fn lines(plan: &OutputPlan) -> Vec<String> {
    let baud = match plan.baud_divisor {
        Ok(divisor) => format!("{:.3} -> {divisor}", plan.baud_exact),
        Err(e) => format!("{:.3} ({e})", plan.baud_exact),
    };
    vec![
        format!("  input bytes   {}", plan.input_bytes),
        format!("  samples       {}", plan.samples),
        format!("  sample rate   {} kHz", plan.sample_rate.khz()),
        format!("  oversampling  {}", plan.osr.get()),
        format!("  output bits   {}", plan.bits),
        format!("  output bytes  {}", plan.bytes),
        format!("  size          {:.2} MiB", plan.mebibytes()),
        format!("  sectors       {}", plan.sectors),
        format!("  clock         {} Hz", plan.clock_hz),
        format!("  baud divisor  {baud}"),
        format!("  SECTOR_MAX    {}", plan.sectors),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use pdm::{Oversampling, SampleRate};

    #[test]
    fn one_second_at_8khz_osr_4() {
        let plan = OutputPlan::with_reference_clock(
            16_000,
            8_000,
            SampleRate::Hz8000,
            Oversampling::new(4).unwrap(),
        );
        let text = lines(&plan).join("\n");
        assert!(text.contains("output bytes  8000"));
        assert!(text.contains("sectors       15"));
        assert!(text.contains("sample rate   8 kHz"));
        assert!(text.contains("155.250 -> 155"));
    }

    #[test]
    fn unusable_divisor_is_explained() {
        let plan = OutputPlan::new(
            2,
            1,
            SampleRate::Hz16000,
            Oversampling::new(255).unwrap(),
            1_000_000,
        );
        let text = lines(&plan).join("\n");
        assert!(text.contains("baud divisor"));
        assert!(!text.contains("->"));
    }
}
