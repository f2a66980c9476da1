mod test_support;

use serde_json::json;
use test_support::{
    add_discipline, add_group, add_schedule, add_student, add_teacher, error_code, login, request,
    request_ok, setup_workspace, spawn_sidecar, today_string,
};

#[test]
fn dashboard_shows_today_and_trailing_stats() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin_token = setup_workspace(&mut stdin, &mut reader, "attendanced-dash");

    let group_id = add_group(&mut stdin, &mut reader, &admin_token, "CS-701");
    let teacher_id = add_teacher(&mut stdin, &mut reader, &admin_token, "teach1", "Terry Teacher");
    let student_id = add_student(
        &mut stdin,
        &mut reader,
        &admin_token,
        "student1",
        "Sam Student",
        Some(&group_id),
    );
    let teacher_token = login(&mut stdin, &mut reader, "teach1", "teach123");
    let discipline_id =
        add_discipline(&mut stdin, &mut reader, &teacher_token, "Math", &group_id, 2);

    // Two lessons today, out of time order on purpose.
    let late_lesson = add_schedule(
        &mut stdin,
        &mut reader,
        &admin_token,
        &discipline_id,
        &group_id,
        &teacher_id,
        &today_string(),
        "13:00",
    );
    add_schedule(
        &mut stdin,
        &mut reader,
        &admin_token,
        &discipline_id,
        &group_id,
        &teacher_id,
        &today_string(),
        "09:00",
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "teacher.markAttendance",
        json!({
            "token": teacher_token,
            "scheduleId": late_lesson,
            "studentId": student_id,
            "status": "present"
        }),
    );

    let student_token = login(&mut stdin, &mut reader, "student1", "student123");
    let dash = request_ok(
        &mut stdin,
        &mut reader,
        "student.dashboard",
        json!({ "token": student_token }),
    );
    assert_eq!(dash["inGroup"], true);
    assert_eq!(dash["groupCode"], "CS-701");

    let lessons = dash["todaySchedule"].as_array().unwrap();
    assert_eq!(lessons.len(), 2);
    assert_eq!(lessons[0]["lessonTime"], "09:00");
    assert_eq!(lessons[1]["lessonTime"], "13:00");
    assert_eq!(lessons[0]["teacherName"], "Terry Teacher");

    assert_eq!(dash["disciplines"][0]["name"], "Math");
    assert_eq!(dash["disciplines"][0]["semester"], 2);

    assert_eq!(dash["stats"]["total"], 1);
    assert_eq!(dash["stats"]["present"], 1);
    assert_eq!(dash["stats"]["absent"], 0);
}

#[test]
fn students_without_a_group_get_a_notice_not_a_query() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin_token = setup_workspace(&mut stdin, &mut reader, "attendanced-nogroup");

    add_student(&mut stdin, &mut reader, &admin_token, "loner", "Lee Lone", None);
    let token = login(&mut stdin, &mut reader, "loner", "student123");

    let dash = request_ok(
        &mut stdin,
        &mut reader,
        "student.dashboard",
        json!({ "token": token }),
    );
    assert_eq!(dash["inGroup"], false);
    assert!(dash["groupCode"].is_null());
    assert_eq!(dash["todaySchedule"].as_array().unwrap().len(), 0);
    assert_eq!(dash["stats"]["total"], 0);

    let disciplines = request(
        &mut stdin,
        &mut reader,
        "student.disciplines",
        json!({ "token": token }),
    );
    assert_eq!(error_code(&disciplines), "not_in_group");
    let week = request(
        &mut stdin,
        &mut reader,
        "student.weekSchedule",
        json!({ "token": token }),
    );
    assert_eq!(error_code(&week), "not_in_group");
}

#[test]
fn week_schedule_groups_lessons_by_day() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin_token = setup_workspace(&mut stdin, &mut reader, "attendanced-week");

    let group_id = add_group(&mut stdin, &mut reader, &admin_token, "CS-702");
    let teacher_id = add_teacher(&mut stdin, &mut reader, &admin_token, "teach1", "Terry Teacher");
    add_student(
        &mut stdin,
        &mut reader,
        &admin_token,
        "student1",
        "Sam Student",
        Some(&group_id),
    );
    let teacher_token = login(&mut stdin, &mut reader, "teach1", "teach123");
    let discipline_id =
        add_discipline(&mut stdin, &mut reader, &teacher_token, "Math", &group_id, 1);

    let student_token = login(&mut stdin, &mut reader, "student1", "student123");
    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "student.weekSchedule",
        json!({ "token": student_token }),
    );
    let start = empty["startOfWeek"].as_str().unwrap().to_string();
    assert_eq!(empty["days"].as_array().unwrap().len(), 0);

    // Two lessons on the week's Monday, one on Tuesday.
    let monday = start.clone();
    let tuesday = {
        let d = chrono::NaiveDate::parse_from_str(&start, "%Y-%m-%d").unwrap();
        (d + chrono::Duration::days(1)).to_string()
    };
    for (date, time) in [(&monday, "09:00"), (&monday, "11:00"), (&tuesday, "09:00")] {
        add_schedule(
            &mut stdin,
            &mut reader,
            &admin_token,
            &discipline_id,
            &group_id,
            &teacher_id,
            date,
            time,
        );
    }

    let week = request_ok(
        &mut stdin,
        &mut reader,
        "student.weekSchedule",
        json!({ "token": student_token }),
    );
    let days = week["days"].as_array().unwrap();
    assert_eq!(days.len(), 2);
    assert_eq!(days[0]["date"].as_str(), Some(monday.as_str()));
    assert_eq!(days[0]["lessons"].as_array().unwrap().len(), 2);
    assert_eq!(days[1]["date"].as_str(), Some(tuesday.as_str()));
    assert_eq!(days[1]["lessons"].as_array().unwrap().len(), 1);

    // A far-future offset is a different, empty week.
    let other = request_ok(
        &mut stdin,
        &mut reader,
        "student.weekSchedule",
        json!({ "token": student_token, "weekOffset": 10 }),
    );
    assert_eq!(other["days"].as_array().unwrap().len(), 0);
    assert_ne!(other["startOfWeek"], week["startOfWeek"]);
}

#[test]
fn attendance_history_respects_the_date_range() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin_token = setup_workspace(&mut stdin, &mut reader, "attendanced-history");

    let group_id = add_group(&mut stdin, &mut reader, &admin_token, "CS-703");
    let teacher_id = add_teacher(&mut stdin, &mut reader, &admin_token, "teach1", "Terry Teacher");
    let student_id = add_student(
        &mut stdin,
        &mut reader,
        &admin_token,
        "student1",
        "Sam Student",
        Some(&group_id),
    );
    let teacher_token = login(&mut stdin, &mut reader, "teach1", "teach123");
    let discipline_id =
        add_discipline(&mut stdin, &mut reader, &teacher_token, "Math", &group_id, 1);

    let today = today_string();
    let long_ago = "2020-01-15";
    for (date, status) in [(today.as_str(), "present"), (long_ago, "absent")] {
        let schedule_id = add_schedule(
            &mut stdin,
            &mut reader,
            &admin_token,
            &discipline_id,
            &group_id,
            &teacher_id,
            date,
            "09:00",
        );
        request_ok(
            &mut stdin,
            &mut reader,
            "teacher.markAttendance",
            json!({
                "token": teacher_token,
                "scheduleId": schedule_id,
                "studentId": student_id,
                "status": status
            }),
        );
    }

    let student_token = login(&mut stdin, &mut reader, "student1", "student123");

    // Default range: trailing 30 days only sees today's mark.
    let recent = request_ok(
        &mut stdin,
        &mut reader,
        "student.attendance",
        json!({ "token": student_token }),
    );
    let records = recent["records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "present");

    // An explicit range picks up the old mark; bounds are inclusive.
    let old = request_ok(
        &mut stdin,
        &mut reader,
        "student.attendance",
        json!({
            "token": student_token,
            "startDate": "2020-01-15",
            "endDate": "2020-01-15"
        }),
    );
    let records = old["records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "absent");

    let malformed = request(
        &mut stdin,
        &mut reader,
        "student.attendance",
        json!({ "token": student_token, "startDate": "yesterday" }),
    );
    assert_eq!(error_code(&malformed), "validation");
}

#[test]
fn discipline_list_includes_attended_counts() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin_token = setup_workspace(&mut stdin, &mut reader, "attendanced-stud-disc");

    let group_id = add_group(&mut stdin, &mut reader, &admin_token, "CS-704");
    let teacher_id = add_teacher(&mut stdin, &mut reader, &admin_token, "teach1", "Terry Teacher");
    let student_id = add_student(
        &mut stdin,
        &mut reader,
        &admin_token,
        "student1",
        "Sam Student",
        Some(&group_id),
    );
    let teacher_token = login(&mut stdin, &mut reader, "teach1", "teach123");
    let discipline_id =
        add_discipline(&mut stdin, &mut reader, &teacher_token, "Math", &group_id, 3);
    let schedule_id = add_schedule(
        &mut stdin,
        &mut reader,
        &admin_token,
        &discipline_id,
        &group_id,
        &teacher_id,
        &today_string(),
        "09:00",
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "teacher.markAttendance",
        json!({
            "token": teacher_token,
            "scheduleId": schedule_id,
            "studentId": student_id,
            "status": "present"
        }),
    );

    let student_token = login(&mut stdin, &mut reader, "student1", "student123");
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "student.disciplines",
        json!({ "token": student_token }),
    );
    let rows = listing["disciplines"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "Math");
    assert_eq!(rows[0]["semester"], 3);
    assert_eq!(rows[0]["teacherName"], "Terry Teacher");
    assert_eq!(rows[0]["attendedClasses"], 1);
}
