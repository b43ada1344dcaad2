//! CLI entry point: wires `EngineConfig` into a `TaskList`, a `Reactor`, and
//! an `Orchestrator`, then drives the event loop to completion.

use std::process::ExitCode;
use std::rc::Rc;

use fetchd::config::EngineConfig;
use fetchd::dashboard::ConsoleDashboard;
use fetchd::orchestrator::Orchestrator;
use fetchd::reactor::Reactor;
use fetchd::task::TaskList;

fn main() -> ExitCode {
    env_logger::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), fetchd::error::EngineError> {
    let config = EngineConfig::parse()?;
    let tasks = TaskList::from_file(&config.task_file, &config.output_path)?;

    let (mut reactor, factory) = Reactor::new(config.concurrency, config.backlog, config.speed_limit)
        .map_err(fetchd::error::EngineError::ReactorInit)?;

    let factory: Rc<dyn fetchd::orchestrator::DownloaderFactory> = Rc::new(factory);
    let mut orchestrator = Orchestrator::new(
        Rc::downgrade(&factory),
        tasks,
        Box::new(ConsoleDashboard::new()),
        config.max_redirect,
    );

    orchestrator.prime(config.concurrency);
    reactor.run(&mut orchestrator);

    Ok(())
}
