use neuroadapt_core::config::ConfigError;
use neuroadapt_core::{
    EngineConfig, FeatureBands, RetrainMode, SessionEvent, SessionOutcome, SessionProcessor,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config()?;
    config.log_insights = true;
    config.learner.retrain_mode = RetrainMode::Inline;
    println!(
        "Loaded config: arms={} traits={} seed={}",
        config.n_arms, config.trait_dims, config.seed
    );

    let seed = config.seed;
    let trait_dims = config.trait_dims;
    let mut processor = SessionProcessor::new(config);
    let mut rng = StdRng::seed_from_u64(seed ^ 0xABCD_EF01);

    for step in 1..=120u64 {
        let event = simulated_event(&mut rng, trait_dims, step);
        let insight = processor.process(&event)?;

        if step % 20 == 0 {
            println!(
                "event {:>3}: arm={} score={:.3} growth={:.3} signal={:+.3} trained={}",
                step,
                insight.selected_arm,
                insight.plasticity_score,
                insight.growth_potential,
                insight.control_signal,
                insight.trained
            );
        }
        if let Some(report) = insight.retrain {
            println!(
                "  retrained on {} examples: accuracy={:.2} f1={:.2} ({} ms)",
                report.examples_used, report.val_accuracy, report.val_f1, report.elapsed_ms
            );
        }
    }

    let stats = processor.bandit_statistics();
    println!(
        "Walkthrough complete. {} pulls, {} fallback draws, error cycle {:.1} events",
        stats.total_pulls,
        stats.fallback_draws,
        processor.control_oscillation_period()
    );
    for arm in &stats.arms {
        println!(
            "  arm {}: pulls={} mean_reward={:.3} exploration_pressure={:.3}",
            arm.arm, arm.pulls, arm.mean_reward, arm.exploration_pressure
        );
    }
    println!("Insight records appended to logs/insights.jsonl");
    Ok(())
}

// Sessions drift upward in quality over time so the growth trend has
// something to find.
fn simulated_event(rng: &mut StdRng, trait_dims: usize, step: u64) -> SessionEvent {
    let focus = rng.gen::<f32>();
    let lift = (step as f32 / 400.0).min(0.2);

    SessionEvent {
        learner_traits: (0..trait_dims).map(|_| rng.gen::<f32>()).collect(),
        bands: FeatureBands {
            theta_power: 0.4 + 0.3 * focus,
            alpha_power: 0.3 + 0.4 * rng.gen::<f32>(),
            gamma_power: 0.2 + 0.3 * focus,
        },
        outcome: SessionOutcome {
            retention: (0.4 + 0.4 * focus + lift).min(1.0),
            improvement: (0.3 + 0.5 * rng.gen::<f32>() + lift).min(1.0),
            adaptation: 0.4 + 0.2 * rng.gen::<f32>(),
        },
        target_engagement: 0.7,
    }
}

fn load_config() -> Result<EngineConfig, ConfigError> {
    EngineConfig::load_from_file("config/engine.toml").or_else(|err| {
        eprintln!("Falling back to default config: {err}");
        Ok(EngineConfig::default())
    })
}
