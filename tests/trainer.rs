use digit_net::{Command, Device, Monitor, NetError, Network, NetworkConfig, Reply, Status, Trainer, Vector};
use std::thread;
use std::time::{Duration, Instant};

fn network(with_data: bool) -> Network {
    let config = NetworkConfig {
        layer_sizes: vec![4, 6, 3],
        learning_rate: 0.05,
        batch_size: 5,
        eval_interval: 500,
        eval_samples: 6,
        seed: Some(1234),
        device: Device::Cpu,
        ..NetworkConfig::default()
    };
    let mut net = Network::new(config).unwrap();
    if with_data {
        let inputs: Vec<Vector> = (0..6)
            .map(|i| {
                let mut v = vec![0.0; 4];
                v[i % 4] = 1.0;
                Vector::from_vec(v)
            })
            .collect();
        let labels: Vec<usize> = (0..6).map(|i| i % 3).collect();
        net.set_train_vectors(inputs.clone(), labels.clone()).unwrap();
        net.set_test_vectors(inputs, labels).unwrap();
    }
    net
}

fn wait_for_position(monitor: &Monitor, at_least: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while monitor.position() < at_least {
        assert!(Instant::now() < deadline, "training made no progress");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn pause_preserves_position_and_resume_continues() {
    let trainer = Trainer::spawn(network(true)).unwrap();
    let monitor = trainer.monitor();
    assert_eq!(monitor.status(), Status::Idle);

    trainer.start().unwrap();
    wait_for_position(&monitor, 200);
    trainer.pause().unwrap();
    assert_eq!(trainer.status(), Status::Paused);

    let paused = monitor.snapshot(10);
    let paused_losses = monitor.loss_history();
    thread::sleep(Duration::from_millis(30));
    let later = monitor.snapshot(10);
    assert_eq!(paused, later);
    assert_eq!(paused.epoch, (paused.position - 1) / 6);
    assert_eq!(paused.recent_predictions.len(), 10);

    trainer.resume().unwrap();
    wait_for_position(&monitor, paused.position + 50);
    let resumed = monitor.snapshot(0);
    assert!(resumed.epoch >= paused.epoch);
    assert_eq!(monitor.loss_history()[..paused.position], paused_losses[..]);

    trainer.stop().unwrap();
    assert_eq!(monitor.status(), Status::Idle);
    let stopped_at = monitor.position();
    let net = trainer.shutdown().unwrap();
    assert_eq!(net.position(), stopped_at);
    assert_eq!(net.status(), Status::Idle);
}

#[test]
fn commands_follow_the_state_machine() {
    let trainer = Trainer::spawn(network(true)).unwrap();
    assert!(matches!(
        trainer.pause(),
        Err(NetError::InvalidState { status: Status::Idle, .. })
    ));
    assert!(trainer.resume().is_err());
    assert!(trainer.stop().is_err());

    trainer.start().unwrap();
    assert!(matches!(
        trainer.start(),
        Err(NetError::InvalidState { status: Status::Training, .. })
    ));
    assert!(trainer.resume().is_err());
    assert!(trainer.evaluate(6).is_err());

    trainer.pause().unwrap();
    assert!(trainer.start().is_err());
    let acc = trainer.evaluate(6).unwrap();
    assert!((0.0..=1.0).contains(&acc));
    assert_eq!(trainer.monitor().confusion_matrix().total(), 6);

    assert_eq!(trainer.command(Command::Stop).unwrap(), Reply::Status(Status::Idle));
    trainer.start().unwrap();
    trainer.stop().unwrap();
}

#[test]
fn start_without_data_reports_error_and_stays_idle() {
    let trainer = Trainer::spawn(network(false)).unwrap();
    assert!(matches!(trainer.start(), Err(NetError::EmptyDataset(_))));
    assert_eq!(trainer.status(), Status::Idle);
    let snapshot = trainer.monitor().snapshot(16);
    assert_eq!(snapshot.mean_loss, None);
    assert_eq!(snapshot.train_accuracy, None);
    assert_eq!(snapshot.test_accuracy, None);
    assert!(trainer.evaluate(5).is_err());
}

#[test]
fn restart_after_stop_begins_from_scratch() {
    let trainer = Trainer::spawn(network(true)).unwrap();
    let monitor = trainer.monitor();
    trainer.start().unwrap();
    wait_for_position(&monitor, 100);
    trainer.stop().unwrap();
    assert!(monitor.position() >= 100);

    trainer.start().unwrap();
    trainer.pause().unwrap();
    // a carried-over epoch counter would run ahead of the fresh position
    let position = monitor.position();
    assert_eq!(monitor.epoch(), position.saturating_sub(1) / 6);
    assert_eq!(monitor.loss_history().len(), position);
    trainer.stop().unwrap();
}

#[test]
fn dropping_a_running_trainer_stops_the_loop() {
    let trainer = Trainer::spawn(network(true)).unwrap();
    let monitor = trainer.monitor();
    trainer.start().unwrap();
    wait_for_position(&monitor, 10);
    drop(trainer);
    assert_eq!(monitor.status(), Status::Idle);
}

#[test]
fn monitor_shows_the_sample_behind_each_prediction() {
    let trainer = Trainer::spawn(network(true)).unwrap();
    let monitor = trainer.monitor();
    assert!(monitor.train_sample(0).is_some());
    trainer.start().unwrap();
    wait_for_position(&monitor, 20);
    trainer.pause().unwrap();

    let s = monitor.snapshot(3);
    let first = s.position - 3;
    for k in 0..3 {
        let p = (first + k) % s.dataset_len;
        let (input, label) = monitor.train_sample(p).unwrap();
        assert_eq!(label, p % 3);
        assert_eq!(input[p % 4], 1.0);
    }
    assert!(monitor.train_sample(s.dataset_len).is_none());
    trainer.stop().unwrap();
}
