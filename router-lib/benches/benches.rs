use rand::Rng;
use std::collections::BTreeSet;
use std::time::Instant;

use ccsds_router::decoder::{Decoded, FrameDecoder};
use ccsds_router::filter::Filter;
use ccsds_router::spacepacket::SEQ_UNSEGMENTED;
use ccsds_router::{Endian, PrimaryHeader};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};

fn packets(count: usize, data_len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let mut dat = Vec::with_capacity(count * (PrimaryHeader::LEN + data_len));
    for seq in 0..count {
        let ph = PrimaryHeader {
            apid: rng.gen_range(0..=PrimaryHeader::APID_MAX),
            sequence_flags: SEQ_UNSEGMENTED,
            sequence_id: (seq % 16384) as u16,
            len_minus1: (data_len - 1) as u16,
            ..PrimaryHeader::default()
        };
        dat.extend_from_slice(&ph.encode(Endian::Big));
        dat.extend((0..data_len).map(|_| rng.gen::<u8>()));
    }
    dat
}

fn bench_decode_variable(c: &mut Criterion) {
    let data = packets(1000, 1024);
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("variable", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::variable(0, 0, Endian::Big, 4096);
            let mut count = 0;
            for chunk in data.chunks(4096) {
                decoder.push(chunk, Instant::now());
                count += decoder
                    .by_ref()
                    .filter(|d| matches!(d, Decoded::Frame(_)))
                    .count();
            }
            assert_eq!(count, 1000);
        });
    });
    group.bench_function("fixed", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::fixed(1030);
            for chunk in data.chunks(4096) {
                decoder.push(chunk, Instant::now());
                decoder.by_ref().for_each(drop);
            }
        });
    });
}

fn bench_resync(c: &mut Criterion) {
    // oversized header followed by data that never looks like a header
    let mut data = packets(1, 2000);
    data.extend(std::iter::repeat(0xff).take(64 * 1024));
    let mut group = c.benchmark_group("resync");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("scan", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::variable(0, 0, Endian::Big, 1024);
            decoder.push(&data, Instant::now());
            decoder.by_ref().for_each(drop);
        });
    });
}

fn bench_filter(c: &mut Criterion) {
    let data = packets(1000, 64);
    let mut decoder = FrameDecoder::variable(0, 0, Endian::Big, 4096);
    decoder.push(&data, Instant::now());
    let frames: Vec<_> = decoder
        .filter_map(|d| match d {
            Decoded::Frame(f) => Some(f),
            _ => None,
        })
        .collect();
    let filter = Filter::new(4096, BTreeSet::from_iter(0..1024));

    let mut group = c.benchmark_group("filter");
    group.throughput(Throughput::Elements(frames.len() as u64));
    group.bench_function("apid", |b| {
        b.iter(|| frames.iter().map(|f| filter.check(f)).count());
    });
}

criterion_group!(benches, bench_decode_variable, bench_resync, bench_filter);
criterion_main!(benches);
