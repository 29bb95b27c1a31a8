use chrono::{NaiveDate, NaiveTime};
use copilot::kernel::entity::{Entity, EntityExtractor, EntityKind, EntitySource, EntityValue, TravelMode};
use copilot::kernel::normalizer::normalize;
use copilot::ReferenceClock;

fn clock_at(y: i32, m: u32, d: u32, h: u32) -> ReferenceClock {
    let local = NaiveDate::from_ymd_opt(y, m, d).and_then(|d| d.and_hms_opt(h, 0, 0)).unwrap();
    ReferenceClock::from_local(chrono_tz::America::New_York, local).unwrap()
}

// Sunday 2024-03-10, 09:00 New York
fn clock() -> ReferenceClock {
    clock_at(2024, 3, 10, 9)
}

fn extract(raw: &str, clock: &ReferenceClock) -> Vec<Entity> {
    EntityExtractor::default().extract(&normalize(raw), clock)
}

fn values(entities: &[Entity], kind: EntityKind) -> Vec<EntityValue> {
    entities.iter().filter(|e| e.kind() == kind).map(|e| e.value.clone()).collect()
}

fn date(y: i32, m: u32, d: u32) -> EntityValue {
    EntityValue::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

fn time(h: u32, m: u32) -> EntityValue {
    EntityValue::Time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
}

#[test]
fn test_reminder_example_entities() {
    let entities = extract("remind me to submit the lab report tomorrow at 5pm", &clock());

    assert_eq!(values(&entities, EntityKind::Date), vec![date(2024, 3, 11)]);
    assert_eq!(values(&entities, EntityKind::Time), vec![time(17, 0)]);
    assert_eq!(
        values(&entities, EntityKind::FreeText),
        vec![EntityValue::Text("submit the lab report".into())]
    );
}

#[test]
fn test_weekday_is_strictly_after_reference() {
    // 1. From Sunday, "next friday" is five days out
    let entities = extract("meeting next friday", &clock());
    assert_eq!(values(&entities, EntityKind::Date), vec![date(2024, 3, 15)]);

    // 2. Asked on a Friday, "friday" means the following week
    let friday = clock_at(2024, 3, 15, 10);
    let entities = extract("what do i have on friday", &friday);
    assert_eq!(values(&entities, EntityKind::Date), vec![date(2024, 3, 22)]);
}

#[test]
fn test_relative_offset_yields_date_and_time() {
    let entities = extract("remind me in 2 hours", &clock());
    assert_eq!(values(&entities, EntityKind::Date), vec![date(2024, 3, 10)]);
    assert_eq!(values(&entities, EntityKind::Time), vec![time(11, 0)]);
}

#[test]
fn test_month_day_without_year_rolls_forward() {
    let entities = extract("exam on march 14", &clock());
    assert_eq!(values(&entities, EntityKind::Date), vec![date(2024, 3, 14)]);

    let entities = extract("exam on march 1", &clock());
    assert_eq!(values(&entities, EntityKind::Date), vec![date(2025, 3, 1)]);
}

#[test]
fn test_time_forms() {
    let c = clock();
    assert_eq!(values(&extract("at 5:30 p.m.", &c), EntityKind::Time), vec![time(17, 30)]);
    assert_eq!(values(&extract("by 17:45", &c), EntityKind::Time), vec![time(17, 45)]);
    assert_eq!(values(&extract("lunch at noon", &c), EntityKind::Time), vec![time(12, 0)]);
    // Bare hour after "at": afternoon reading
    assert_eq!(values(&extract("meet at 7", &c), EntityKind::Time), vec![time(19, 0)]);
    // A bare number elsewhere is not a time
    assert!(values(&extract("room 7 please", &c), EntityKind::Time).is_empty());
}

#[test]
fn test_durations() {
    let entities = extract("book the gym for 2 hours", &clock());
    assert_eq!(
        values(&entities, EntityKind::Duration),
        vec![EntityValue::Duration { minutes: 120 }]
    );
    let entities = extract("study 90mins", &clock());
    assert_eq!(
        values(&entities, EntityKind::Duration),
        vec![EntityValue::Duration { minutes: 90 }]
    );
}

#[test]
fn test_gazetteer_exact_and_fuzzy() {
    // 1. Alias resolves to the canonical name
    let entities = extract("where is the canteen", &clock());
    let hit = entities.iter().find(|e| e.kind() == EntityKind::Location).unwrap();
    assert_eq!(hit.value, EntityValue::Location("Student Cafeteria".into()));
    assert_eq!(hit.source, EntitySource::GazetteerExact);

    // 2. One typo still finds the library, with lower confidence
    let entities = extract("where is the libary", &clock());
    let hit = entities.iter().find(|e| e.kind() == EntityKind::Location).unwrap();
    assert_eq!(hit.value, EntityValue::Location("Campus Library".into()));
    assert_eq!(hit.source, EntitySource::GazetteerFuzzy);
    assert!(hit.confidence < 1.0);
}

#[test]
fn test_course_codes_are_never_fuzzy() {
    let entities = extract("where is cs 102", &clock());
    let courses = values(&entities, EntityKind::Course);
    assert_eq!(courses, vec![EntityValue::Course("CS102".into())]);
}

#[test]
fn test_cue_skips_articles() {
    let entities = extract("directions to the gym from the library", &clock());
    let library = entities
        .iter()
        .find(|e| e.value == EntityValue::Location("Campus Library".into()))
        .unwrap();
    assert_eq!(library.cue.as_deref(), Some("from"));
    let gym = entities
        .iter()
        .find(|e| e.value == EntityValue::Location("Campus Gymnasium".into()))
        .unwrap();
    assert_eq!(gym.cue.as_deref(), Some("to"));
}

#[test]
fn test_hint_admits_bare_hour_and_whole_reply() {
    let extractor = EntityExtractor::default();

    // 1. TIME hint: "5" alone is an hour
    let entities = extractor.extract_with_hint(&normalize("5"), &clock(), Some(EntityKind::Time));
    assert_eq!(values(&entities, EntityKind::Time), vec![time(17, 0)]);

    // 2. LOCATION hint: unknown place falls back to the reply, lead words stripped
    let entities = extractor.extract_with_hint(&normalize("to the observatory"), &clock(), Some(EntityKind::Location));
    let hit = entities.iter().find(|e| e.kind() == EntityKind::Location).unwrap();
    assert_eq!(hit.value, EntityValue::Location("observatory".into()));
    assert_eq!(hit.source, EntitySource::Fallback);

    // 3. FREE_TEXT hint stops short of a trailing time
    let entities = extractor.extract_with_hint(&normalize("call mom at 6"), &clock(), Some(EntityKind::FreeText));
    assert_eq!(
        values(&entities, EntityKind::FreeText),
        vec![EntityValue::Text("call mom".into())]
    );
}

#[test]
fn test_nothing_recognizable_is_empty_not_error() {
    assert!(extract("lol ok", &clock()).is_empty());
    assert!(extract("", &clock()).is_empty());
}

#[test]
fn test_extraction_is_deterministic() {
    let c = clock();
    let a = extract("poster for the spring festival on april 20 at 6pm in the student center", &c);
    let b = extract("poster for the spring festival on april 20 at 6pm in the student center", &c);
    assert_eq!(a, b);
}

#[test]
fn test_oversized_counts_are_dropped_not_panicking() {
    // 1. Offsets past the end of the calendar, and counts that overflow when scaled
    for raw in ["in 4000000000 days", "in 999999999 weeks", "in 4000000000 hours"] {
        let entities = extract(raw, &clock());
        assert!(values(&entities, EntityKind::Date).is_empty(), "{raw:?} gave {entities:?}");
        assert!(values(&entities, EntityKind::Time).is_empty(), "{raw:?} gave {entities:?}");
    }

    // 2. Durations that overflow in minutes
    for raw in ["for 99999999 hours", "99999999 hours"] {
        let entities = extract(raw, &clock());
        assert!(values(&entities, EntityKind::Duration).is_empty(), "{raw:?} gave {entities:?}");
    }

    // 3. Large but representable values still resolve
    let entities = extract("in 1000 days", &clock());
    assert_eq!(values(&entities, EntityKind::Date), vec![date(2026, 12, 5)]);
}

#[test]
fn test_week_phrases_yield_ranges() {
    // 1. "this week" runs seven days from today
    let entities = extract("what's on my calendar this week", &clock());
    assert_eq!(
        values(&entities, EntityKind::DateRange),
        vec![EntityValue::DateRange {
            start: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            days: 7
        }]
    );
    assert!(values(&entities, EntityKind::Date).is_empty());

    // 2. "next week" is both a day a week out and the Monday-to-Sunday week
    let entities = extract("events next week", &clock());
    assert_eq!(values(&entities, EntityKind::Date), vec![date(2024, 3, 17)]);
    assert_eq!(
        values(&entities, EntityKind::DateRange),
        vec![EntityValue::DateRange {
            start: NaiveDate::from_ymd_opt(2024, 3, 11).unwrap(),
            days: 7
        }]
    );
}

#[test]
fn test_travel_mode_phrases() {
    let entities = extract("how do i get to the gym by bike", &clock());
    assert_eq!(
        values(&entities, EntityKind::TravelMode),
        vec![EntityValue::Mode(TravelMode::Bicycling)]
    );

    // A bare noun is not a mode
    let entities = extract("make a poster for the bike rally", &clock());
    assert!(values(&entities, EntityKind::TravelMode).is_empty());
}
