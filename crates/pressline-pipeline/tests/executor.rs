use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pressline_config::CapacityConfig;
use pressline_events::EventBus;
use pressline_pipeline::{
    AdmissionController, Catalog, PipelineError, PipelineExecutor, PipelineOutcome, TaskRegistry,
};
use pressline_protocol::{CompletionNotice, Request, Transformation};
use pressline_telemetry::Metrics;
use pressline_test_support::{PipelineFixture, fixtures::sample_bytes, scripts};
use serial_test::serial;
use uuid::Uuid;

type TestResult = anyhow::Result<()>;

fn executor(fixture: &PipelineFixture) -> anyhow::Result<PipelineExecutor> {
    let config = CapacityConfig::load(&fixture.config_path)?;
    Ok(PipelineExecutor::new(
        Arc::new(Catalog::new(&fixture.bin_dir)?),
        Arc::new(AdmissionController::from_config(&config)),
        Arc::new(TaskRegistry::new()),
        EventBus::new(),
        Metrics::new()?,
    ))
}

fn all_released(executor: &PipelineExecutor) -> bool {
    executor
        .admission()
        .snapshot()
        .iter()
        .all(|entry| entry.in_use == 0)
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn single_nop_copies_input_unchanged() -> TestResult {
    let fixture = PipelineFixture::new(&[("nop", 1)])?;
    let executor = executor(&fixture)?;
    let data = sample_bytes(200_000);
    let input = fixture.write_input("in.bin", &data)?;
    let output = fixture.path("out.bin");

    let request = Request::process_file(1, &input, &output, &[Transformation::Nop]);
    let outcome = executor.execute(Uuid::new_v4(), &request).await;

    assert!(outcome.is_done(), "{outcome:?}");
    assert_eq!(fs::read(&output)?, data);
    assert_eq!(
        outcome.to_notice(),
        CompletionNotice::Done {
            bytes_input: 200_000,
            bytes_output: 200_000
        }
    );
    assert!(all_released(&executor));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn chained_nop_processes_preserve_bytes() -> TestResult {
    let fixture = PipelineFixture::new(&[("nop", 3)])?;
    let executor = executor(&fixture)?;
    let data = sample_bytes(300_000);
    let input = fixture.write_input("in.bin", &data)?;
    let output = fixture.path("out.bin");

    let stages = [Transformation::Nop; 3];
    let outcome = executor
        .execute(Uuid::new_v4(), &Request::process_file(1, &input, &output, &stages))
        .await;

    assert!(outcome.is_done(), "{outcome:?}");
    assert_eq!(fs::read(&output)?, data);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn stages_beyond_capacity_run_once_upstream_exits() -> TestResult {
    let fixture = PipelineFixture::new(&[("nop", 1)])?;
    let executor = executor(&fixture)?;
    let input = fixture.write_input("in.txt", b"fits in one pipe buffer")?;
    let output = fixture.path("out.txt");

    let stages = [Transformation::Nop, Transformation::Nop];
    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        executor.execute(Uuid::new_v4(), &Request::process_file(1, &input, &output, &stages)),
    )
    .await?;

    assert!(outcome.is_done(), "{outcome:?}");
    assert_eq!(fs::read(&output)?, b"fits in one pipe buffer");
    assert!(all_released(&executor));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn compress_then_decompress_round_trips() -> TestResult {
    let fixture = PipelineFixture::new(&[
        ("bcompress", 1),
        ("bdecompress", 1),
        ("gcompress", 1),
        ("gdecompress", 1),
    ])?;
    let executor = executor(&fixture)?;
    let data = sample_bytes(150_000);
    let input = fixture.write_input("in.bin", &data)?;

    for (compress, decompress) in [
        (Transformation::ByteCompress, Transformation::ByteDecompress),
        (Transformation::GenericCompress, Transformation::GenericDecompress),
    ] {
        let output = fixture.path(&format!("{compress}.out"));
        let request = Request::process_file(1, &input, &output, &[compress, decompress]);
        let outcome = executor.execute(Uuid::new_v4(), &request).await;
        assert!(outcome.is_done(), "{compress}: {outcome:?}");
        assert_eq!(fs::read(&output)?, data, "{compress} round trip");
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn compress_and_encrypt_completes_and_releases_slots() -> TestResult {
    let fixture = PipelineFixture::new(&[("bcompress", 1), ("encrypt", 1)])?;
    let executor = executor(&fixture)?;
    let input = fixture.write_input("in.txt", b"the quick brown fox jumps over the lazy dog\n")?;
    let output = fixture.path("out.txt");

    let request = Request::process_file(
        1,
        &input,
        &output,
        &[Transformation::ByteCompress, Transformation::Encrypt],
    );
    let outcome = executor.execute(Uuid::new_v4(), &request).await;

    let summary = match outcome {
        PipelineOutcome::Done(summary) => summary,
        other => panic!("expected done, got {other:?}"),
    };
    assert_eq!(summary.bytes_input, 44);
    assert!(summary.bytes_output > 0);
    assert!(fs::metadata(&output)?.len() > 0);
    assert!(all_released(&executor));
    assert!(executor.registry().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn missing_executable_fails_at_that_stage() -> TestResult {
    let fixture = PipelineFixture::new(&[("nop", 1), ("encrypt", 1)])?;
    scripts::remove_script(&fixture.bin_dir, "encrypt")?;
    let executor = executor(&fixture)?;
    let input = fixture.write_input("in.txt", &sample_bytes(4_096))?;
    let output = fixture.path("out.txt");

    let request = Request::process_file(
        1,
        &input,
        &output,
        &[Transformation::Nop, Transformation::Encrypt],
    );
    let outcome = executor.execute(Uuid::new_v4(), &request).await;

    match &outcome {
        PipelineOutcome::Failed(PipelineError::Spawn {
            stage,
            transformation,
            ..
        }) => {
            assert_eq!(*stage, 1);
            assert_eq!(*transformation, Transformation::Encrypt);
        }
        other => panic!("expected spawn failure, got {other:?}"),
    }
    assert!(matches!(outcome.to_notice(), CompletionNotice::Failed { .. }));
    assert_eq!(fs::metadata(&output)?.len(), 0);
    assert!(all_released(&executor));

    let retry_input = fixture.write_input("retry.txt", b"still serving")?;
    let retry_output = fixture.path("retry.out");
    let retry = executor
        .execute(
            Uuid::new_v4(),
            &Request::process_file(1, &retry_input, &retry_output, &[Transformation::Nop]),
        )
        .await;
    assert!(retry.is_done());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn non_zero_exit_is_reported_with_status() -> TestResult {
    let fixture = PipelineFixture::new(&[("encrypt", 1), ("decrypt", 1)])?;
    scripts::install_failing(&fixture.bin_dir, "decrypt", 3)?;
    let executor = executor(&fixture)?;
    let input = fixture.write_input("in.txt", b"abc")?;
    let output = fixture.path("out.txt");

    let request = Request::process_file(
        1,
        &input,
        &output,
        &[Transformation::Encrypt, Transformation::Decrypt],
    );
    let outcome = executor.execute(Uuid::new_v4(), &request).await;

    let CompletionNotice::Failed { reason } = outcome.to_notice() else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(reason, "stage 1 (decrypt) exited with status 3");
    assert!(all_released(&executor));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn unreadable_input_fails_before_spawning() -> TestResult {
    let fixture = PipelineFixture::new(&[("encrypt", 1)])?;
    let executor = executor(&fixture)?;
    let output = fixture.path("out.txt");

    let request = Request::process_file(
        1,
        fixture.path("absent.txt"),
        &output,
        &[Transformation::Encrypt],
    );
    let outcome = executor.execute(Uuid::new_v4(), &request).await;

    assert!(matches!(
        outcome,
        PipelineOutcome::Failed(PipelineError::Io {
            operation: "open input",
            ..
        })
    ));
    assert!(!output.exists());
    assert!(all_released(&executor));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn third_encrypt_waits_for_a_free_slot() -> TestResult {
    let fixture = PipelineFixture::new(&[("encrypt", 2), ("decrypt", 2)])?;
    scripts::install_slow_rot13(&fixture.bin_dir, "encrypt", 0.6)?;
    let executor = executor(&fixture)?;
    let input = fixture.write_input("in.txt", b"Hello")?;

    let admission = Arc::clone(executor.admission());
    let sampler = tokio::spawn(async move {
        let mut peak = 0;
        for _ in 0..300 {
            peak = peak.max(admission.in_use(Transformation::Encrypt));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        peak
    });

    let started = Instant::now();
    let mut runs = tokio::task::JoinSet::new();
    for index in 0..3 {
        let executor = executor.clone();
        let request = Request::process_file(
            1,
            &input,
            fixture.path(&format!("out-{index}.txt")),
            &[Transformation::Encrypt],
        );
        runs.spawn(async move { executor.execute(Uuid::new_v4(), &request).await });
    }
    while let Some(outcome) = runs.join_next().await {
        let outcome = outcome?;
        assert!(outcome.is_done(), "{outcome:?}");
    }
    let elapsed = started.elapsed();

    assert!(
        elapsed >= Duration::from_millis(1_200),
        "third run must wait for a released slot, finished in {elapsed:?}"
    );
    assert_eq!(sampler.await?, 2);
    for index in 0..3 {
        assert_eq!(fs::read(fixture.path(&format!("out-{index}.txt")))?, b"Uryyb");
    }
    assert!(all_released(&executor));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn closed_admission_fails_waiting_stage() -> TestResult {
    let fixture = PipelineFixture::new(&[("nop", 1), ("encrypt", 1)])?;
    let executor = executor(&fixture)?;
    let input = fixture.write_input("in.txt", b"data")?;

    let held = executor
        .admission()
        .await_admit(Transformation::Encrypt)
        .await?;
    executor.admission().close();

    let request = Request::process_file(
        1,
        &input,
        fixture.path("out.txt"),
        &[Transformation::Nop, Transformation::Encrypt],
    );
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        executor.execute(Uuid::new_v4(), &request),
    )
    .await?;

    assert!(matches!(
        outcome,
        PipelineOutcome::Failed(PipelineError::AdmissionClosed { stage: 1, .. })
    ));
    drop(held);
    assert!(all_released(&executor));
    Ok(())
}
