use chrono::NaiveDate;
use journey_core::dates::date_to_serial;
use journey_core::layout::{FIXED_HEADERS, FIXED_UNITS};
use journey_core::{build_timeline, CanonicalTable, Cell, MetricDictionary, PhaseKind, TimelineConfig};

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn text(value: &str) -> Cell {
    if value.is_empty() {
        Cell::Empty
    } else {
        Cell::text(value)
    }
}

struct Row<'a> {
    date: NaiveDate,
    phase: &'a str,
    cycle: &'a str,
    scheme: &'a str,
    event: &'a str,
    metrics: Vec<Cell>,
}

fn row<'a>(date: NaiveDate, phase: &'a str, cycle: &'a str, scheme: &'a str, event: &'a str) -> Row<'a> {
    Row {
        date,
        phase,
        cycle,
        scheme,
        event,
        metrics: Vec::new(),
    }
}

fn table(metrics: &[(&str, &str)], rows: Vec<Row<'_>>) -> CanonicalTable {
    let mut header: Vec<Cell> = FIXED_HEADERS.iter().map(|h| text(h)).collect();
    let mut units: Vec<Cell> = FIXED_UNITS.iter().map(|u| text(u)).collect();
    for (name, unit) in metrics {
        header.push(text(name));
        units.push(text(unit));
    }

    let mut out = vec![vec![text("肿瘤病程周期表")], vec![], header, units];
    for row in rows {
        let mut cells = vec![
            Cell::Number(date_to_serial(row.date) as f64),
            text(row.phase),
            text(row.cycle),
            Cell::Empty,
            text(row.scheme),
            text(row.event),
            Cell::Empty,
        ];
        cells.extend(row.metrics);
        out.push(cells);
    }
    CanonicalTable::new(out)
}

fn build(table: &CanonicalTable) -> journey_core::Timeline {
    build_timeline(table, &MetricDictionary::standard(), &TimelineConfig::default())
}

#[test]
fn consecutive_cycles_split_into_phases() {
    let timeline = build(&table(
        &[],
        vec![
            row(day(2024, 1, 1), "化疗", "C1D1", "TC", ""),
            row(day(2024, 1, 8), "化疗", "C1D8", "", ""),
            row(day(2024, 1, 22), "化疗", "C2D1", "", ""),
        ],
    ));

    assert_eq!(timeline.phases.len(), 2);
    let first = &timeline.phases[0];
    assert_eq!(first.cycle_tag.as_deref(), Some("C1"));
    assert_eq!((first.start, first.end), (day(2024, 1, 1), day(2024, 1, 22)));
    assert_eq!(first.duration_days, 21);
    assert_eq!(first.scheme.as_deref(), Some("TC"));

    let last = &timeline.phases[1];
    assert_eq!(last.cycle_tag.as_deref(), Some("C2"));
    assert_eq!(last.scheme.as_deref(), Some("TC"), "scheme carries over");
    assert_eq!(last.end, day(2024, 2, 12), "open phase gets the default length");
}

#[test]
fn last_phase_extends_to_latest_row() {
    let timeline = build(&table(
        &[],
        vec![
            row(day(2024, 1, 1), "化疗", "C1D1", "", ""),
            row(day(2024, 3, 1), "化疗", "C1D15", "", ""),
        ],
    ));
    assert_eq!(timeline.phases.len(), 1);
    assert_eq!(timeline.phases[0].end, day(2024, 3, 1));
}

#[test]
fn surveillance_rows_collapse_into_one_phase() {
    let timeline = build(&table(
        &[],
        vec![
            row(day(2024, 1, 1), "化疗", "C6D1", "TC", ""),
            row(day(2024, 2, 1), "随访", "AS1", "观察", ""),
            row(day(2024, 3, 1), "随访", "AS2", "观察", ""),
        ],
    ));

    assert_eq!(timeline.phases.len(), 2);
    let surveillance = &timeline.phases[1];
    assert_eq!(surveillance.label, "AS");
    assert_eq!(surveillance.cycle_tag.as_deref(), Some("AS"));
    assert_eq!(surveillance.scheme, None);
    assert_eq!(surveillance.start, day(2024, 2, 1));
}

#[test]
fn surgical_label_opens_surgery_phase() {
    let timeline = build(&table(
        &[],
        vec![
            row(day(2024, 1, 1), "新辅助化疗", "C1D1", "TC", ""),
            row(day(2024, 1, 20), "腹腔镜手术", "", "", "手术"),
            row(day(2024, 2, 10), "辅助化疗", "C1D1", "TC", ""),
        ],
    ));

    let kinds: Vec<PhaseKind> = timeline.phases.iter().map(|p| p.kind).collect();
    assert_eq!(kinds, vec![PhaseKind::Medication, PhaseKind::Surgery, PhaseKind::Medication]);
    let surgery = &timeline.phases[1];
    assert_eq!(surgery.cycle_tag, None);
    assert_eq!((surgery.start, surgery.end), (day(2024, 1, 20), day(2024, 2, 10)));
    assert_eq!(timeline.phases[0].end, surgery.start);
}

#[test]
fn surgery_inside_cycle_splits_but_other_labels_do_not() {
    let timeline = build(&table(
        &[],
        vec![
            row(day(2024, 1, 1), "化疗", "C1D1", "TC", ""),
            row(day(2024, 1, 8), "靶向治疗", "", "", ""),
            row(day(2024, 1, 15), "开腹探查术", "", "", ""),
        ],
    ));

    assert_eq!(timeline.phases.len(), 2);
    assert_eq!(timeline.phases[0].cycle_tag.as_deref(), Some("C1"));
    assert_eq!(timeline.phases[0].end, day(2024, 1, 15));
    assert_eq!(timeline.phases[1].kind, PhaseKind::Surgery);
    assert_eq!(timeline.phases[1].label, "开腹探查术");
}

#[test]
fn untagged_non_surgical_phases_are_not_displayed() {
    let timeline = build(&table(
        &[],
        vec![
            row(day(2024, 1, 1), "初诊", "", "", ""),
            row(day(2024, 1, 10), "化疗", "C1D1", "", ""),
        ],
    ));
    assert_eq!(timeline.phases.len(), 1);
    assert_eq!(timeline.phases[0].label, "化疗");
}

#[test]
fn label_equal_to_event_is_not_a_boundary() {
    let timeline = build(&table(
        &[],
        vec![row(day(2024, 1, 1), "CT", "", "", "CT")],
    ));
    assert!(timeline.phases.is_empty());
    assert_eq!(timeline.events.len(), 1);
}

#[test]
fn phases_never_overlap() {
    let timeline = build(&table(
        &[],
        vec![
            row(day(2024, 1, 1), "化疗", "C1D1", "", ""),
            row(day(2024, 1, 22), "化疗", "C2D1", "", ""),
            row(day(2024, 2, 12), "化疗", "C3D1", "", ""),
            row(day(2024, 3, 4), "随访", "AS1", "", ""),
        ],
    ));
    for pair in timeline.phases.windows(2) {
        assert!(pair[0].end <= pair[1].start);
        assert!(pair[0].start <= pair[0].end);
    }
    let last = timeline.phases.last().unwrap();
    assert!(last.duration_days > 0);
}

#[test]
fn same_day_events_get_increasing_overlap() {
    let timeline = build(&table(
        &[],
        vec![
            row(day(2024, 1, 1), "", "", "", "手术"),
            row(day(2024, 1, 1), "", "", "", "输血"),
            row(day(2024, 1, 5), "", "", "", "出院"),
        ],
    ));
    let overlaps: Vec<(NaiveDate, usize)> =
        timeline.events.iter().map(|e| (e.date, e.overlap_index)).collect();
    assert_eq!(
        overlaps,
        vec![(day(2024, 1, 1), 0), (day(2024, 1, 1), 1), (day(2024, 1, 5), 0)]
    );
}

#[test]
fn metric_points_above_threshold_are_alerts() {
    let mut first = row(day(2024, 1, 1), "化疗", "C1D1", "", "");
    first.metrics = vec![Cell::Number(3.0)];
    let mut second = row(day(2024, 1, 22), "化疗", "C2D1", "", "");
    second.metrics = vec![Cell::text("12")];
    let mut third = row(day(2024, 2, 12), "化疗", "C3D1", "", "");
    third.metrics = vec![Cell::text("<5")];

    let timeline = build(&table(&[("CEA", "<5")], vec![first, second, third]));
    let cea = &timeline.series[0];
    assert_eq!(cea.canonical_name, "CEA");
    assert_eq!(cea.threshold, Some(5.0));
    let alerts: Vec<bool> = cea.points.iter().map(|p| p.is_alert).collect();
    assert_eq!(alerts, vec![false, true, false]);
    assert_eq!(cea.alert_count(), 1);
}

#[test]
fn custom_metric_threshold_comes_from_unit_row() {
    let mut only = row(day(2024, 1, 1), "化疗", "C1D1", "", "");
    only.metrics = vec![Cell::Number(4.1), Cell::text("阴性")];
    let timeline = build(&table(&[("细胞角蛋白19片段", "<3.3"), ("HPV", "")], vec![only]));

    let cyfra = &timeline.series[0];
    assert_eq!(cyfra.threshold, Some(3.3));
    assert!(cyfra.points[0].is_alert);
    assert_eq!(cyfra.unit, "<3.3");
    assert!(timeline.series[1].points.is_empty(), "text leftovers are dropped");
}

#[test]
fn display_scale_maps_range_into_band() {
    let mut a = row(day(2024, 1, 1), "", "", "", "");
    a.metrics = vec![Cell::Number(10.0)];
    let mut b = row(day(2024, 1, 2), "", "", "", "");
    b.metrics = vec![Cell::Number(70.0)];
    let timeline = build(&table(&[("Weight", "KG")], vec![a, b]));

    let weight = &timeline.series[0];
    assert_eq!(weight.range_min, 10.0);
    assert_eq!(weight.range_max, 70.0);
    assert_eq!(weight.midpoint, 40.0);
    assert_eq!(weight.display_scale, 1.0);
    assert_eq!(weight.display_offset, 10.0);
    assert_eq!(weight.unit, "KG");
}

#[test]
fn flat_series_uses_unit_scale() {
    let mut a = row(day(2024, 1, 1), "", "", "", "");
    a.metrics = vec![Cell::Number(55.0)];
    let mut b = row(day(2024, 1, 2), "", "", "", "");
    b.metrics = vec![Cell::Number(55.0)];
    let timeline = build(&table(&[("Weight", "KG")], vec![a, b]));
    assert_eq!(timeline.series[0].display_scale, 1.0);
    assert_eq!(timeline.series[0].display_offset, -5.0);
}

#[test]
fn no_dated_rows_gives_empty_timeline() {
    let mut empty = table(&[], vec![]);
    empty.rows.push(vec![Cell::text("日期不详"), Cell::text("化疗")]);
    let timeline = build(&empty);
    assert!(timeline.is_empty());
    assert!(timeline.phases.is_empty());
    assert!(timeline.events.is_empty());
    assert!(timeline.series.is_empty());
}

#[test]
fn unsorted_rows_are_ordered_by_date() {
    let timeline = build(&table(
        &[],
        vec![
            row(day(2024, 1, 22), "化疗", "C2D1", "", ""),
            row(day(2024, 1, 1), "化疗", "C1D1", "", ""),
        ],
    ));
    assert_eq!(timeline.first_date, Some(day(2024, 1, 1)));
    assert_eq!(timeline.phases[0].cycle_tag.as_deref(), Some("C1"));
}
