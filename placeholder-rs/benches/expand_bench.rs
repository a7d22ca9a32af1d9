use criterion::{black_box, criterion_group, criterion_main, Criterion};
use placeholder::{DynamicConfig, PlaceholderParser, Template};

const START_GCODE: &str = "\
M190 S[bed_temperature]\n\
M104 S{first_layer_temperature[0]}\n\
G28 ; home all axes\n\
{if first_layer_height < 0.3}G1 Z{first_layer_height * 2} F3000{else}G1 Z0.6 F3000{endif}\n\
{local purge = (10, 20, 30)}\n\
{if is_extruder_used[current_extruder]}G1 X{purge[current_extruder]} E{interpolate_table(first_layer_height, (0.1, 5), (0.3, 12))}{endif}\n\
M117 {filament_type[0]} {digits(first_layer_height, 0, 2)}mm\n";

fn printer() -> PlaceholderParser {
    let mut p = PlaceholderParser::empty();
    p.set("bed_temperature", vec![60i64, 70]);
    p.set("first_layer_temperature", vec![215i64, 240]);
    p.set("first_layer_height", 0.2);
    p.set("is_extruder_used", vec![true, false]);
    p.set("filament_type", vec!["PLA", "PETG"]);
    p
}

fn make_template(repeats: usize) -> String {
    START_GCODE.repeat(repeats)
}

fn bench_expand(c: &mut Criterion) {
    let p = printer();
    let mut over = DynamicConfig::new();
    over.set("current_extruder", 0i64);

    let mut g = c.benchmark_group("expand");

    for (label, repeats) in [("small", 1), ("med", 20), ("large", 200)] {
        let src = make_template(repeats);
        let compiled = Template::parse(&src).unwrap();

        g.bench_function(format!("parse_and_eval_{label}"), |b| {
            b.iter(|| p.process(black_box(&src), 0, Some(&over), None, None).unwrap())
        });
        g.bench_function(format!("eval_only_{label}"), |b| {
            b.iter(|| {
                p.process_template(black_box(&compiled), 0, Some(&over), None, None)
                    .unwrap()
            })
        });
    }

    g.finish();
}

criterion_group!(benches, bench_expand);
criterion_main!(benches);
