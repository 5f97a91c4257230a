use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_contact(contact: &Contact) -> Result<(), EngineError> {
    let name = contact.name.trim();
    if name.is_empty() {
        return Err(EngineError::InvalidInput("customer name is empty".into()));
    }
    if contact.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("customer name too long"));
    }
    if contact.email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("email too long"));
    }
    match contact.email.trim().split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(())
        }
        _ => Err(EngineError::InvalidInput(format!(
            "invalid email address {:?}",
            contact.email
        ))),
    }
}

pub(crate) fn validate_service_name(name: &str) -> Result<(), EngineError> {
    if name.len() > MAX_SERVICE_NAME_LEN {
        return Err(EngineError::LimitExceeded("service name too long"));
    }
    Ok(())
}

pub(crate) fn validate_answers(answers: &Answers) -> Result<(), EngineError> {
    if answers.len() > MAX_ANSWERS {
        return Err(EngineError::LimitExceeded("too many answers"));
    }
    for (key, value) in answers {
        if key.len() > MAX_ANSWER_KEY_LEN {
            return Err(EngineError::LimitExceeded("answer key too long"));
        }
        if value.to_string().len() > MAX_ANSWER_VALUE_LEN {
            return Err(EngineError::LimitExceeded("answer value too large"));
        }
    }
    Ok(())
}

pub(crate) fn validate_new_appointment(new: &NewAppointment) -> Result<(), EngineError> {
    if let Some(customer) = &new.customer {
        validate_contact(customer)?;
    }
    if let Some(service) = &new.service_name {
        validate_service_name(service)?;
    }
    Ok(())
}
