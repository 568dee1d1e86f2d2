use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dirindex::archive::{build_manifest, stream_archive};
use std::fs;
use std::hint::black_box;
use std::io;
use std::path::Path;
use tempfile::TempDir;

fn create_test_tree(depth: usize, files_per_dir: usize, dirs_per_level: usize, file_size: usize) -> TempDir {
    let temp_dir = TempDir::new().unwrap();

    fn create_level(path: &Path, current_depth: usize, max_depth: usize, files: usize, dirs: usize, size: usize) {
        if current_depth >= max_depth {
            return;
        }
        for i in 0..files {
            let content: Vec<u8> = (0..size).map(|b| ((b * 31 + i) % 251) as u8).collect();
            fs::write(path.join(format!("file_{}.bin", i)), content).unwrap();
        }
        for i in 0..dirs {
            let sub = path.join(format!("dir_{}", i));
            fs::create_dir(&sub).unwrap();
            create_level(&sub, current_depth + 1, max_depth, files, dirs, size);
        }
    }

    let root = temp_dir.path().join("root");
    fs::create_dir(&root).unwrap();
    create_level(&root, 0, depth, files_per_dir, dirs_per_level, file_size);
    temp_dir
}

fn benchmark_manifest(c: &mut Criterion) {
    let mut group = c.benchmark_group("manifest");
    for (depth, files, dirs) in [(2, 20, 3), (3, 10, 4)] {
        let tree = create_test_tree(depth, files, dirs, 16);
        let root = tree.path().join("root");
        group.bench_with_input(
            BenchmarkId::new("recursive", format!("d{}_f{}_s{}", depth, files, dirs)),
            &root,
            |b, root| b.iter(|| black_box(build_manifest(root, true).unwrap())),
        );
    }
    group.finish();
}

fn benchmark_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_archive");
    group.sample_size(20);
    for file_size in [4 * 1024, 256 * 1024] {
        let tree = create_test_tree(1, 32, 0, file_size);
        let manifest = build_manifest(&tree.path().join("root"), false).unwrap();
        group.throughput(Throughput::Bytes((file_size * manifest.len()) as u64));
        group.bench_with_input(BenchmarkId::new("flat", file_size), &manifest, |b, manifest| {
            b.iter(|| black_box(stream_archive(manifest, io::sink()).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_manifest, benchmark_stream);
criterion_main!(benches);
