use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pus_mib::lexer::clean;
use pus_mib::parser::{parse_file, FileId};
use pus_mib::{ExtractConfig, MacroConfig, MibExtractor, PacketKind, ParallelConfig, SourceFile};

/// A header set of `n` telemetry packets sharing one header file
fn synthetic_headers(n: usize) -> Vec<SourceFile> {
    let mut files = vec![SourceFile::new(
        "head.h",
        "#ifndef HEAD_H\n#define HEAD_H\n\
         struct TmHead { uint16_t apid; uint8_t service; uint8_t subtype; };\n\
         /*{ cal_def: \"TEMP\", num_cal: [[0, -40], [4095, 125]], unit: \"degC\" }*/\n\
         #endif\n",
    )];
    for i in 0..n {
        files.push(SourceFile::new(
            format!("hk{}.h", i),
            format!(
                "#define N_SENSORS_{i} {count}\n\
                 /*{{ apid: {apid}, service: 3, sub: 25 }}*/\n\
                 struct Hk{i} {{\n\
                     TmHead head;\n\
                     uint8_t sid;    /*{{ sid: true, const_value: {i} }}*/\n\
                     // calib: TEMP\n\
                     uint16_t temps[N_SENSORS_{i}];\n\
                 #ifdef WITH_STATUS\n\
                     uint32_t status;\n\
                 #endif\n\
                 }};\n",
                i = i,
                count = 4 + i % 8,
                apid = 100 + i,
            ),
        ));
    }
    files
}

fn config(n: usize, parallel: ParallelConfig) -> ExtractConfig {
    let mut macros = MacroConfig::new();
    macros.define("WITH_STATUS");
    let mut config = ExtractConfig::default().with_macros(macros);
    for i in 0..n {
        config = config.with_root(format!("Hk{}", i), PacketKind::Tm);
    }
    config.parallel = parallel;
    config
}

fn cleaning_benchmark(c: &mut Criterion) {
    let files = synthetic_headers(50);
    let text: String = files.iter().map(|f| f.text.as_str()).collect();

    c.bench_function("clean 50 headers", |b| b.iter(|| clean(black_box(&text))));
}

fn parsing_benchmark(c: &mut Criterion) {
    let files = synthetic_headers(50);
    let macros = MacroConfig::new();

    c.bench_function("parse 50 headers", |b| {
        b.iter(|| {
            files
                .iter()
                .enumerate()
                .map(|(i, f)| parse_file(FileId(i), black_box(f), &macros))
                .count()
        })
    });
}

fn extraction_benchmark(c: &mut Criterion) {
    let files = synthetic_headers(200);

    c.bench_function("extract 200 packets sequential", |b| {
        let extractor = MibExtractor::new(config(200, ParallelConfig::sequential()));
        b.iter(|| extractor.extract_sources(black_box(files.clone())).unwrap())
    });

    c.bench_function("extract 200 packets parallel", |b| {
        let extractor = MibExtractor::new(config(200, ParallelConfig::default()));
        b.iter(|| extractor.extract_sources(black_box(files.clone())).unwrap())
    });
}

criterion_group!(benches, cleaning_benchmark, parsing_benchmark, extraction_benchmark);
criterion_main!(benches);
