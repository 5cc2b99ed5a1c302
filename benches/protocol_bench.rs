use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use strongbox::crypto::{cksum, SymmetricCipher, SymmetricKey};
use strongbox::protocol::{
    ClientBody, ClientId, ClientMessage, FrameReader, NameField, Request, RequestKind,
};

const SIZES: [usize; 4] = [1024, 64 * 1024, 1024 * 1024, 8 * 1024 * 1024];

fn content(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

fn bench_cksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("cksum");

    for size in SIZES.iter() {
        let data = content(*size);
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| cksum(black_box(data)));
        });
    }
    group.finish();
}

fn bench_encrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("aes_cbc_encrypt");
    let cipher = SymmetricCipher::from_key(SymmetricKey::generate());

    for size in SIZES.iter() {
        let data = content(*size);
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| cipher.encrypt(black_box(data)));
        });
    }
    group.finish();
}

fn bench_upload_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("upload_message");
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let filename = NameField::new("new_users.txt").unwrap();

    for size in SIZES.iter() {
        let message = ClientMessage::new(
            ClientId::random(),
            3,
            ClientBody::UploadFile {
                filename: filename.clone(),
                content: Bytes::from(content(*size)),
            },
        );
        let packed = message.pack().unwrap();
        group.throughput(Throughput::Bytes(packed.len() as u64));

        group.bench_with_input(BenchmarkId::new("pack", size), &message, |b, message| {
            b.iter(|| black_box(message).pack().unwrap());
        });
        group.bench_with_input(BenchmarkId::new("parse", size), &packed, |b, packed| {
            b.iter(|| {
                rt.block_on(async {
                    let mut reader = FrameReader::new(black_box(&packed[..]));
                    ClientMessage::parse(&mut reader, 3).await.unwrap()
                })
            });
        });
    }
    group.finish();
}

fn bench_backup_request(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let request = Request::new(
        42,
        1,
        RequestKind::BackupFile {
            filename: "photo.jpg".to_string(),
            payload: Bytes::from(content(64 * 1024)),
        },
    );
    let packed = request.pack().unwrap();

    c.bench_function("backup_request_pack", |b| {
        b.iter(|| black_box(&request).pack().unwrap());
    });
    c.bench_function("backup_request_parse", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut reader = FrameReader::new(black_box(&packed[..]));
                Request::parse(&mut reader, 1).await.unwrap()
            })
        });
    });
}

criterion_group!(
    benches,
    bench_cksum,
    bench_encrypt,
    bench_upload_message,
    bench_backup_request
);
criterion_main!(benches);
