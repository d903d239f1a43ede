/// Gradient sanity checks: simple closed-form functions, then every
/// parameter of a log-linear model and a two-hidden-layer MLP
use candle_core::{Device, Tensor};
use tiny_tagger::gradcheck::{GradCheckSuite, GradientChecker};
use tiny_tagger::layers::activations::{tanh, tanh_derivative};
use tiny_tagger::layers::Activation;
use tiny_tagger::models::Mlp;

fn check_mlp(suite: &mut GradCheckSuite, name: &str, mlp: &Mlp, x: &Tensor, y: usize) -> anyhow::Result<()> {
    for i in 0..mlp.params().len() {
        let f = |candidate: &Tensor| -> tiny_tagger::Result<(f64, Tensor)> {
            let mut params = mlp.params().to_vec();
            params[i] = candidate.clone();
            let (loss, grads) = Mlp::from_params(params, Activation::Tanh)?.loss_and_gradients(x, y)?;
            Ok((loss, grads[i].clone()))
        };
        suite.check(&format!("{} param {}", name, i), f, &mlp.params()[i])?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stdout)
        .init();

    let device = Device::Cpu;
    let mut suite = GradCheckSuite::new(GradientChecker::default());

    // f(x) = x^2, f'(x) = 2x
    let quad = |x: &Tensor| -> tiny_tagger::Result<(f64, Tensor)> {
        Ok((x.sqr()?.sum_all()?.to_scalar::<f64>()?, (x * 2.0)?))
    };
    suite.check("x^2 scalar", quad, &Tensor::new(2f64, &device)?)?;
    suite.check("x^2 vector", quad, &Tensor::randn(0f64, 1f64, 3, &device)?)?;
    suite.check("x^2 matrix", quad, &Tensor::randn(0f64, 1f64, (4, 5), &device)?)?;

    let tanh_sum = |x: &Tensor| -> tiny_tagger::Result<(f64, Tensor)> {
        Ok((tanh(x)?.sum_all()?.to_scalar::<f64>()?, tanh_derivative(x)?))
    };
    suite.check("tanh", tanh_sum, &Tensor::randn(0f64, 1f64, (2, 3), &device)?)?;

    let x = Tensor::randn(0f64, 1f64, 5, &device)?;
    check_mlp(&mut suite, "log-linear", &Mlp::log_linear(5, 3, &device)?, &x, 0)?;
    check_mlp(&mut suite, "mlp", &Mlp::new(&[5, 4, 3, 2], &device)?, &x, 1)?;

    for (name, outcome) in suite.outcomes() {
        println!("{:<20} {}", name, outcome);
    }

    let failures = suite.failures().count();
    if failures > 0 {
        anyhow::bail!("{} gradient checks failed", failures);
    }
    log::info!("All {} gradient checks passed", suite.outcomes().len());
    Ok(())
}
