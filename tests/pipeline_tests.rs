//! End-to-end tests over a small synthetic task root

use clinical_seqpack::archive::{read_split, ArchiveExporter, ArchiveManifest, StaticFeatures};
use clinical_seqpack::pipeline::{self, ENCODED_DIR, PACKED_DIR, TARGETS_DIR};
use clinical_seqpack::types::{STATIC_FILE, VOCAB_FILE};
use clinical_seqpack::{run_pipeline, PipelineConfig, SequencePacker, Targets, Task, Vocabulary};
use ndarray::{array, s, Array2};
use ndarray_npy::WriteNpyExt;
use pretty_assertions::assert_eq;
use std::fs::{self, File};
use std::path::Path;
use tempfile::tempdir;

/// One stay: file name, time-series CSV, manifest label cells
struct Stay {
    file: &'static str,
    series: &'static str,
    labels: &'static str,
}

fn write_split(root: &Path, split: &str, label_header: &str, stays: &[Stay]) {
    let dir = root.join(split);
    fs::create_dir_all(&dir).unwrap();
    let mut listfile = format!("Stay, Filename ,{label_header}\n");
    for (i, stay) in stays.iter().enumerate() {
        listfile.push_str(&format!("{},{},{}\n", 100 + i, stay.file, stay.labels));
        fs::write(dir.join(stay.file), stay.series).unwrap();
    }
    fs::write(dir.join("listfile.csv"), listfile).unwrap();
}

fn mortality_root(root: &Path) {
    write_split(
        root,
        "train",
        "mortality",
        &[
            Stay {
                file: "10_episode1_timeseries.csv",
                series: "Hours,Heart Rate,Glucose\n2.5,88,\n0.5,80,140\n1.0,,NaN\n",
                labels: "1",
            },
            Stay {
                file: "11_episode1_timeseries.csv",
                series: "Hours,Heart Rate\n0,70\n1,71\n2,72\n3,73\n",
                labels: "0",
            },
            Stay {
                file: "12_episode1_timeseries.csv",
                series: "Minutes,Heart Rate,pH\n30,90,7.35\n90,95,7.30\n",
                labels: "1.0",
            },
        ],
    );
    write_split(
        root,
        "test",
        "mortality",
        &[Stay {
            file: "20_episode1_timeseries.csv",
            series: "Hours,Glucose\n5,110\n",
            labels: "0",
        }],
    );
}

#[test]
fn test_full_run_for_mortality() {
    let dir = tempdir().unwrap();
    let raw = dir.path().join("raw");
    mortality_root(&raw);

    let config = PipelineConfig::new(
        Task::Mortality,
        &raw,
        dir.path().join("work"),
        dir.path().join("ihm.npz"),
    )
    .with_max_len(3);
    let summary = run_pipeline(&config).unwrap();

    assert_eq!(summary.splits, vec!["train", "test"]);
    assert_eq!(summary.normalized[0].samples, 3);
    assert_eq!(summary.normalized[0].events, 11);

    // Vocabulary: sorted names, ids from 1, persisted once for all splits
    let vocab = Vocabulary::load(&config.work_root.join(ENCODED_DIR).join(VOCAB_FILE)).unwrap();
    let names: Vec<&str> = vocab.iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["Glucose", "Heart Rate", "pH"]);
    assert_eq!(vocab.encode("Glucose"), Some(1));

    let train = read_split(&config.archive_path, "train").unwrap();
    assert_eq!(train.x.shape(), &[3, 3, 4]);
    assert_eq!(train.y, Targets::Int(array![[1], [0], [1]]));

    // Stay 0 sorted by time: 0.5 (HR, Glucose), 2.5 (HR) fills the window
    let first = train.x.slice(s![0, .., ..]);
    assert_eq!(first.column(0).to_vec(), vec![0.5, 0.5, 2.5]);
    let decoded: Vec<&str> = first
        .column(1)
        .iter()
        .map(|&id| vocab.decode(id as u32).unwrap())
        .collect();
    assert_eq!(decoded, vec!["Heart Rate", "Glucose", "Heart Rate"]);

    // Stay 1 has four events; only the most recent three survive
    assert_eq!(
        train.x.slice(s![1, .., 0]).to_vec(),
        vec![1.0, 2.0, 3.0]
    );
    assert_eq!(
        train.x.slice(s![1, .., 2]).to_vec(),
        vec![71.0, 72.0, 73.0]
    );

    // Minutes are converted to hours and hours never decrease within a window
    assert_eq!(train.x[[2, 0, 0]], 0.5);
    for sample in train.x.outer_iter() {
        let hours: Vec<f32> = sample
            .outer_iter()
            .filter(|row| row[1] != 0.0)
            .map(|row| row[0])
            .collect();
        assert!(hours.windows(2).all(|w| w[0] <= w[1]), "{hours:?}");
    }

    let test = read_split(&config.archive_path, "test").unwrap();
    assert_eq!(test.x.shape(), &[1, 3, 4]);
    assert_eq!(test.x.slice(s![0, 0, ..]).to_vec(), vec![5.0, 1.0, 110.0, 0.0]);
    assert!(test.x.slice(s![0, 1.., ..]).iter().all(|&v| v == 0.0));

    let manifest = ArchiveManifest::load(&ArchiveManifest::path_for(&config.archive_path)).unwrap();
    assert_eq!(manifest, summary.manifest);
    assert_eq!(manifest.producer.name, clinical_seqpack::PRODUCER_NAME);
}

#[test]
fn test_staged_phenotyping_with_static_features() {
    let dir = tempdir().unwrap();
    let raw = dir.path().join("raw");
    let work = dir.path().join("work");
    write_split(
        &raw,
        "train",
        "subject_id,Sepsis,Shock",
        &[
            Stay {
                file: "a.csv",
                series: "Time,Temp\n0,37.0\n",
                labels: "7,1,0",
            },
            Stay {
                file: "b.csv",
                series: "Time,Temp\n1,38.5\n",
                labels: "8,0,1",
            },
        ],
    );
    let splits = vec!["train".to_string()];

    let clean = work.join("clean");
    let encoded = work.join(ENCODED_DIR);
    let packed = work.join(PACKED_DIR);
    let targets = work.join(TARGETS_DIR);

    pipeline::normalize_splits(&raw, &splits, &clean).unwrap();
    let vocab = pipeline::build_vocabulary(&clean, &splits).unwrap();
    pipeline::encode_splits(&vocab, &clean, &splits, &encoded).unwrap();
    pipeline::pack_splits(&SequencePacker::new(4).unwrap(), &encoded, &splits, &packed).unwrap();

    let features: Array2<f64> = array![[0.1, 0.2], [0.3, 0.4]];
    features
        .write_npy(File::create(packed.join("train").join(STATIC_FILE)).unwrap())
        .unwrap();

    let built = pipeline::build_targets(Task::Phenotyping, &packed, &splits, &targets).unwrap();
    assert_eq!(built[0], Targets::Int(array![[1, 0], [0, 1]]));

    let archive = dir.path().join("pheno.npz");
    let manifest = pipeline::export_archive(
        &ArchiveExporter::with_instance_id("staged".to_string()),
        &targets,
        &splits,
        &archive,
    )
    .unwrap();

    assert_eq!(manifest.splits[0].y_shape, vec![2, 2]);
    assert_eq!(manifest.splits[0].static_shape, Some(vec![2, 2]));
    assert_eq!(manifest.splits[0].static_dtype.as_deref(), Some("float64"));

    let train = read_split(&archive, "train").unwrap();
    assert_eq!(train.static_features, Some(StaticFeatures::F64(features)));
}

#[test]
fn test_length_of_stay_keeps_missing_labels_as_nan() {
    let dir = tempdir().unwrap();
    let raw = dir.path().join("raw");
    write_split(
        &raw,
        "val",
        "LOS",
        &[
            Stay {
                file: "a.csv",
                series: "hours,HR\n0,60\n",
                labels: "12.5",
            },
            Stay {
                file: "b.csv",
                series: "hours,HR\n0,61\n",
                labels: "",
            },
        ],
    );

    let config = PipelineConfig::new(
        Task::LengthOfStay,
        &raw,
        dir.path().join("work"),
        dir.path().join("los.npz"),
    );
    run_pipeline(&config).unwrap();

    let val = read_split(&config.archive_path, "val").unwrap();
    assert_eq!(val.x.shape(), &[2, 512, 4]);
    match val.y {
        Targets::Float(y) => {
            assert_eq!(y[[0, 0]], 12.5);
            assert!(y[[1, 0]].is_nan());
        }
        other => panic!("expected float targets, got {other:?}"),
    }
}

#[test]
fn test_rerun_over_same_work_root_starts_clean() {
    let dir = tempdir().unwrap();
    let raw = dir.path().join("raw");
    write_split(
        &raw,
        "train",
        "mortality",
        &[
            Stay {
                file: "a.csv",
                series: "Hours,HR\n0,80\n",
                labels: "0",
            },
            Stay {
                file: "b.csv",
                series: "Hours,Bogus\n0,1\n",
                labels: "1",
            },
        ],
    );
    let config = PipelineConfig::new(
        Task::Mortality,
        &raw,
        dir.path().join("work"),
        dir.path().join("ihm.npz"),
    )
    .with_max_len(2);
    run_pipeline(&config).unwrap();

    // Fix the input: drop the second stay, and leave a stray static file behind
    write_split(
        &raw,
        "train",
        "mortality",
        &[Stay {
            file: "a.csv",
            series: "Hours,HR\n0,80\n",
            labels: "0",
        }],
    );
    let stale_path = config.work_root.join(TARGETS_DIR).join("train").join(STATIC_FILE);
    let stale: Array2<f64> = array![[9.0]];
    stale.write_npy(File::create(&stale_path).unwrap()).unwrap();

    let summary = run_pipeline(&config).unwrap();

    assert_eq!(summary.vocabulary_size, 1);
    let vocab = Vocabulary::load(&config.work_root.join(ENCODED_DIR).join(VOCAB_FILE)).unwrap();
    let names: Vec<&str> = vocab.iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["HR"]);

    let train = read_split(&config.archive_path, "train").unwrap();
    assert_eq!(train.x.shape(), &[1, 2, 4]);
    assert_eq!(train.y, Targets::Int(array![[0]]));
    assert_eq!(train.static_features, None);
    assert_eq!(summary.manifest.splits[0].static_shape, None);
}

#[test]
fn test_duplicate_splits_rejected() {
    let config = PipelineConfig::new(Task::Mortality, "raw", "work", "ihm.npz")
        .with_splits(vec!["train".to_string(), "train".to_string()]);
    assert_eq!(run_pipeline(&config).unwrap_err().code(), "CONFIG_ERROR");
}

#[test]
fn test_unknown_task_name() {
    let err = "sepsis".parse::<Task>().unwrap_err();
    assert_eq!(err.code(), "UNKNOWN_TASK");
    assert!(err.to_string().contains("phenotyping"));
}
