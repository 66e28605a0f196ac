use spworker::env::Mind;
use spworker::options::EnvOptions;
use spworker::pool::{EnvKind, EnvPool};
use spworker::prng::Prng;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" || args[1] == "help" {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt::init();

    match args[1].as_str() {
        "kinds" => {
            for kind in EnvKind::ALL {
                println!("{kind}");
            }
            Ok(())
        }
        "rollout" => {
            let Some(kind) = args.get(2) else {
                print_help();
                std::process::exit(2);
            };
            let kind: EnvKind = kind.parse()?;
            let count = parse_or(&args, 3, 4)?;
            let steps = parse_or(&args, 4, 200)?;
            let repeat = parse_or(&args, 5, 1)?;
            run_rollout(kind, count, steps, repeat)
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_help();
            std::process::exit(2);
        }
    }
}

fn print_help() {
    println!("spworker: local tools for the simulation worker");
    println!();
    println!("Usage:");
    println!("  spworker kinds");
    println!("  spworker rollout <kind> [count] [steps] [repeat]");
    println!();
    println!("rollout drives a local pool with random actions and prints per-member stats.");
    println!("The network worker itself is the `spworkerd` daemon.");
}

fn parse_or(args: &[String], idx: usize, default: usize) -> Result<usize, std::num::ParseIntError> {
    args.get(idx).map_or(Ok(default), |s| s.parse())
}

fn run_rollout(
    kind: EnvKind,
    count: usize,
    steps: usize,
    repeat: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let opts = EnvOptions {
        seed: Some(1),
        ..EnvOptions::default()
    };
    let mut pool = EnvPool::new(kind, count, &opts)?;
    let mut rng = Prng::new(0xC0FFEE);
    let width = pool.action_count()?;

    pool.reset_all()?;
    let has_switch = pool.current_mind_all().first().is_some_and(Option::is_some);
    let mut active = vec![true; count];
    let mut returns = vec![0.0; count];
    let mut episodes = vec![0usize; count];

    for _ in 0..steps {
        let actions: Vec<Vec<f64>> = (0..count)
            .map(|_| {
                let mut a: Vec<f64> = (0..width).map(|_| rng.gen_range_f64(-1.0, 1.0)).collect();
                // Rarely hand over to the target mind.
                if let (true, Some(last)) = (has_switch, a.last_mut()) {
                    *last = if rng.next_f64_01() < 0.05 { 1.0 } else { 0.0 };
                }
                a
            })
            .collect();
        let batch = pool.step_all(&actions, &active, repeat.max(1))?;
        for (i, (&r, &done)) in batch.rewards.iter().zip(&batch.dones).enumerate() {
            returns[i] += r;
            if done && active[i] {
                episodes[i] += 1;
                active[i] = false;
            }
        }
        if active.iter().all(|a| !a) {
            break;
        }
    }

    let minds: Vec<Mind> = pool
        .current_mind_all()
        .into_iter()
        .map(|m| m.unwrap_or(Mind::Target))
        .collect();
    let terminal = pool.reward_terminal_mind_all(&minds)?;
    for (i, stat) in pool.get_stat_all().into_iter().enumerate() {
        println!(
            "[{i}] return={:.3} terminal={:.3} finished={} stat={}",
            returns[i],
            terminal[i],
            episodes[i],
            spworker::Value::from(stat)
        );
    }
    Ok(())
}
