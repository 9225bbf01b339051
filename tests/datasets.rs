use digit_net::datasets::{
    load_images, load_labels, load_mnist, read_images, read_labels, write_images, write_labels,
};
use digit_net::{Matrix, Network, NetworkConfig};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::Cursor;
use std::path::PathBuf;

fn synthetic_images() -> Vec<Matrix> {
    (0..3)
        .map(|k| {
            let pixels = (0..12).map(|i| ((i * 20 + k * 7) % 256) as f32).collect();
            Matrix::from_vec(3, 4, pixels).unwrap()
        })
        .collect()
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("digit_net_{name}_{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn images_and_labels_survive_write_then_read() {
    let images = synthetic_images();
    let labels = vec![3u8, 0, 9];

    let mut image_blob = Vec::new();
    write_images(&mut image_blob, &images).unwrap();
    assert_eq!(image_blob.len(), 16 + 3 * 12);
    assert_eq!(&image_blob[4..8], &3u32.to_be_bytes());

    let mut label_blob = Vec::new();
    write_labels(&mut label_blob, &labels).unwrap();

    assert_eq!(read_images(Cursor::new(image_blob)).unwrap(), images);
    assert_eq!(read_labels(Cursor::new(label_blob)).unwrap(), labels);
}

#[test]
fn loads_plain_and_gzipped_files() {
    let dir = scratch_dir("files");
    let images = synthetic_images();

    let plain = dir.join("images-idx3-ubyte");
    write_images(File::create(&plain).unwrap(), &images).unwrap();
    assert_eq!(load_images(&plain).unwrap(), images);

    let gz = dir.join("labels-idx1-ubyte.gz");
    let mut enc = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
    write_labels(&mut enc, &[1, 2, 3]).unwrap();
    enc.finish().unwrap();
    assert_eq!(load_labels(&gz).unwrap(), vec![1, 2, 3]);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn load_mnist_finds_split_files_and_feeds_network() {
    let dir = scratch_dir("split");
    let images = synthetic_images();
    write_images(File::create(dir.join("train-images-idx3-ubyte")).unwrap(), &images).unwrap();
    write_labels(File::create(dir.join("train-labels-idx1-ubyte")).unwrap(), &[0, 1, 1]).unwrap();
    write_images(File::create(dir.join("t10k-images.idx3-ubyte")).unwrap(), &images[..2]).unwrap();
    write_labels(File::create(dir.join("t10k-labels.idx1-ubyte")).unwrap(), &[1, 0, 0]).unwrap();

    let train = load_mnist(&dir, true).unwrap();
    assert_eq!(train.len(), 3);
    assert_eq!(train.labels, vec![0, 1, 1]);

    let config = NetworkConfig {
        layer_sizes: vec![12, 4, 2],
        seed: Some(5),
        ..NetworkConfig::default()
    };
    let mut net = Network::new(config).unwrap();
    net.set_train_data(&train.images, &train.labels).unwrap();
    assert_eq!(net.train_len(), 3);

    // two test images but three labels
    let err = load_mnist(&dir, false).unwrap_err();
    assert!(err.to_string().contains("2 images but 3 labels"));

    fs::remove_dir_all(&dir).ok();
}
