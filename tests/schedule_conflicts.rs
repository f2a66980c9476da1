mod test_support;

use serde_json::json;
use test_support::{
    add_discipline, add_group, add_teacher, error_code, login, request, request_ok,
    setup_workspace, spawn_sidecar,
};

#[test]
fn one_lesson_per_group_date_time() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin_token = setup_workspace(&mut stdin, &mut reader, "attendanced-sched");

    let group_id = add_group(&mut stdin, &mut reader, &admin_token, "CS-501");
    let teacher_id = add_teacher(&mut stdin, &mut reader, &admin_token, "teach1", "Terry Teacher");
    let teacher_token = login(&mut stdin, &mut reader, "teach1", "teach123");
    let discipline_id =
        add_discipline(&mut stdin, &mut reader, &teacher_token, "Math", &group_id, 1);

    test_support::add_schedule(
        &mut stdin,
        &mut reader,
        &admin_token,
        &discipline_id,
        &group_id,
        &teacher_id,
        "2025-04-07",
        "09:00",
    );

    // Same (group, date, time): rejected, exactly one entry survives.
    let dup = request(
        &mut stdin,
        &mut reader,
        "admin.addSchedule",
        json!({
            "token": admin_token,
            "disciplineId": discipline_id,
            "groupId": group_id,
            "teacherId": teacher_id,
            "lessonDate": "2025-04-07",
            "lessonTime": "09:00",
            "lessonType": "seminar"
        }),
    );
    assert_eq!(error_code(&dup), "schedule_conflict");

    // A different time slot is fine.
    test_support::add_schedule(
        &mut stdin,
        &mut reader,
        &admin_token,
        &discipline_id,
        &group_id,
        &teacher_id,
        "2025-04-07",
        "11:00",
    );

    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "admin.listSchedule",
        json!({ "token": admin_token, "startDate": "2025-04-07", "endDate": "2025-04-07" }),
    );
    let days = listing["days"].as_array().unwrap();
    assert_eq!(days.len(), 1);
    let lessons = days[0]["lessons"].as_array().unwrap();
    assert_eq!(lessons.len(), 2);
    assert_eq!(lessons[0]["lessonTime"], "09:00");
    assert_eq!(lessons[1]["lessonTime"], "11:00");
}

#[test]
fn add_schedule_validates_references_and_input() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin_token = setup_workspace(&mut stdin, &mut reader, "attendanced-sched-val");

    let group_id = add_group(&mut stdin, &mut reader, &admin_token, "CS-502");
    let teacher_id = add_teacher(&mut stdin, &mut reader, &admin_token, "teach1", "Terry Teacher");
    let teacher_token = login(&mut stdin, &mut reader, "teach1", "teach123");
    let discipline_id =
        add_discipline(&mut stdin, &mut reader, &teacher_token, "Math", &group_id, 1);

    let missing = request(
        &mut stdin,
        &mut reader,
        "admin.addSchedule",
        json!({
            "token": admin_token,
            "disciplineId": "no-such-discipline",
            "groupId": group_id,
            "teacherId": teacher_id,
            "lessonDate": "2025-04-07",
            "lessonTime": "09:00",
            "lessonType": "lecture"
        }),
    );
    assert_eq!(error_code(&missing), "not_found");

    // A student is not a valid teacher reference.
    let student_id = test_support::add_student(
        &mut stdin,
        &mut reader,
        &admin_token,
        "student1",
        "Sam Student",
        Some(&group_id),
    );
    let wrong_ref = request(
        &mut stdin,
        &mut reader,
        "admin.addSchedule",
        json!({
            "token": admin_token,
            "disciplineId": discipline_id,
            "groupId": group_id,
            "teacherId": student_id,
            "lessonDate": "2025-04-07",
            "lessonTime": "09:00",
            "lessonType": "lecture"
        }),
    );
    assert_eq!(error_code(&wrong_ref), "not_found");

    for (date, time) in [("2025-13-40", "09:00"), ("2025-04-07", "9 o'clock")] {
        let malformed = request(
            &mut stdin,
            &mut reader,
            "admin.addSchedule",
            json!({
                "token": admin_token,
                "disciplineId": discipline_id,
                "groupId": group_id,
                "teacherId": teacher_id,
                "lessonDate": date,
                "lessonTime": time,
                "lessonType": "lecture"
            }),
        );
        assert_eq!(error_code(&malformed), "validation");
    }
}
